// AEAD record protection for TLS 1.3 using aws-lc-rs.

use aws_lc_rs::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use std::io::{Error, ErrorKind, Result};

use super::tls13_cipher_suite::CipherSuite;

pub const AEAD_TAG_LEN: usize = 16;

/// An AEAD key bound to its cipher suite.
pub struct AeadKey {
    key: LessSafeKey,
}

impl AeadKey {
    pub fn new(cipher_suite: CipherSuite, key: &[u8]) -> Result<Self> {
        if key.len() != cipher_suite.key_len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Invalid key length: {} (expected {})",
                    key.len(),
                    cipher_suite.key_len()
                ),
            ));
        }
        let unbound = UnboundKey::new(cipher_suite.algorithm(), key)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("Invalid key: {:?}", e)))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Encrypt `buf` in place and append the authentication tag.
    pub fn seal_in_place(
        &self,
        buf: &mut Vec<u8>,
        iv: &[u8],
        sequence_number: u64,
        aad: &[u8],
    ) -> Result<()> {
        let nonce = make_nonce(iv, sequence_number)?;
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(aad), buf)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("Encryption failed: {:?}", e)))
    }

    /// Decrypt `buf` (ciphertext || tag) in place, returning the plaintext slice.
    pub fn open_in_place<'a>(
        &self,
        buf: &'a mut [u8],
        iv: &[u8],
        sequence_number: u64,
        aad: &[u8],
    ) -> Result<&'a mut [u8]> {
        let nonce = make_nonce(iv, sequence_number)?;
        self.key
            .open_in_place(nonce, Aad::from(aad), buf)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "Decryption failed"))
    }
}

/// Per-record nonce: the static IV XORed with the left-padded sequence number.
fn make_nonce(iv: &[u8], sequence_number: u64) -> Result<Nonce> {
    let mut nonce_bytes: [u8; 12] = iv.try_into().map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("Invalid IV length: {} (expected 12)", iv.len()),
        )
    })?;
    for (b, s) in nonce_bytes[4..].iter_mut().zip(sequence_number.to_be_bytes()) {
        *b ^= s;
    }
    Ok(Nonce::assume_unique_for_key(nonce_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_all_suites() {
        for cs in super::super::tls13_cipher_suite::DEFAULT_CIPHER_SUITES {
            let key = AeadKey::new(*cs, &vec![0x42u8; cs.key_len()]).unwrap();
            let iv = [0x99u8; 12];
            let mut buf = b"Hello, TLS 1.3!".to_vec();
            key.seal_in_place(&mut buf, &iv, 7, b"aad").unwrap();
            assert_eq!(buf.len(), 15 + AEAD_TAG_LEN);
            let plaintext = key.open_in_place(&mut buf, &iv, 7, b"aad").unwrap();
            assert_eq!(plaintext, b"Hello, TLS 1.3!");
        }
    }

    #[test]
    fn test_wrong_sequence_number_fails() {
        let cs = CipherSuite::AES_128_GCM_SHA256;
        let key = AeadKey::new(cs, &[0x42u8; 16]).unwrap();
        let iv = [0x99u8; 12];
        let mut buf = b"sequence".to_vec();
        key.seal_in_place(&mut buf, &iv, 5, b"aad").unwrap();
        assert!(key.open_in_place(&mut buf, &iv, 6, b"aad").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let cs = CipherSuite::CHACHA20_POLY1305_SHA256;
        let key = AeadKey::new(cs, &[0x11u8; 32]).unwrap();
        let iv = [0x22u8; 12];
        let mut buf = b"aad binding".to_vec();
        key.seal_in_place(&mut buf, &iv, 0, b"correct").unwrap();
        assert!(key.open_in_place(&mut buf, &iv, 0, b"wrong").is_err());
    }

    #[test]
    fn test_invalid_key_and_iv_length() {
        let cs = CipherSuite::AES_128_GCM_SHA256;
        assert_eq!(
            AeadKey::new(cs, &[0u8; 15]).err().map(|e| e.kind()),
            Some(ErrorKind::InvalidInput)
        );
        let key = AeadKey::new(cs, &[0u8; 16]).unwrap();
        let mut buf = vec![1, 2, 3];
        let err = key.seal_in_place(&mut buf, &[0u8; 11], 0, b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
