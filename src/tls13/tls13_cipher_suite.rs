//! TLS 1.3 cipher suite definitions
//!
//! A [`CipherSuite`] bundles the wire identifier with the AEAD used for record
//! protection and the hash used for the transcript and HKDF.
//! Per RFC 8446, different cipher suites require different hash algorithms:
//! - TLS_AES_128_GCM_SHA256 (0x1301): SHA256
//! - TLS_AES_256_GCM_SHA384 (0x1302): SHA384
//! - TLS_CHACHA20_POLY1305_SHA256 (0x1303): SHA256

use std::io;

use aws_lc_rs::{
    aead::{AES_128_GCM, AES_256_GCM, Algorithm, CHACHA20_POLY1305},
    digest,
    hmac::{self, HMAC_SHA256, HMAC_SHA384},
};

/// Default TLS 1.3 cipher suites in preference order
pub const DEFAULT_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::AES_128_GCM_SHA256,
    CipherSuite::AES_256_GCM_SHA384,
    CipherSuite::CHACHA20_POLY1305_SHA256,
];

#[derive(Clone, Copy)]
pub struct CipherSuite {
    id: u16,
    name: &'static str,
    algorithm: &'static Algorithm,
    digest_algorithm: &'static digest::Algorithm,
    hmac_algorithm: hmac::Algorithm,
}

impl PartialEq for CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CipherSuite {}

impl CipherSuite {
    pub const AES_128_GCM_SHA256: Self = Self {
        id: 0x1301,
        name: "TLS_AES_128_GCM_SHA256",
        algorithm: &AES_128_GCM,
        digest_algorithm: &digest::SHA256,
        hmac_algorithm: HMAC_SHA256,
    };

    pub const AES_256_GCM_SHA384: Self = Self {
        id: 0x1302,
        name: "TLS_AES_256_GCM_SHA384",
        algorithm: &AES_256_GCM,
        digest_algorithm: &digest::SHA384,
        hmac_algorithm: HMAC_SHA384,
    };

    pub const CHACHA20_POLY1305_SHA256: Self = Self {
        id: 0x1303,
        name: "TLS_CHACHA20_POLY1305_SHA256",
        algorithm: &CHACHA20_POLY1305,
        digest_algorithm: &digest::SHA256,
        hmac_algorithm: HMAC_SHA256,
    };

    /// Get CipherSuite from wire format ID
    pub fn from_id(id: u16) -> Option<Self> {
        DEFAULT_CIPHER_SUITES.iter().copied().find(|cs| cs.id == id)
    }

    /// Get CipherSuite from standard TLS name
    pub fn from_name(name: &str) -> Option<Self> {
        DEFAULT_CIPHER_SUITES
            .iter()
            .copied()
            .find(|cs| cs.name.eq_ignore_ascii_case(name))
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn algorithm(&self) -> &'static Algorithm {
        self.algorithm
    }

    /// Key length in bytes (16 for AES-128, 32 for AES-256/ChaCha20)
    #[inline]
    pub fn key_len(&self) -> usize {
        self.algorithm.key_len()
    }

    /// Nonce/IV length in bytes (always 12 for TLS 1.3)
    #[inline]
    pub fn nonce_len(&self) -> usize {
        self.algorithm.nonce_len()
    }

    /// Hash output length in bytes (32 for SHA256, 48 for SHA384)
    #[inline]
    pub fn hash_len(&self) -> usize {
        self.digest_algorithm.output_len()
    }

    #[inline]
    pub fn digest_algorithm(&self) -> &'static digest::Algorithm {
        self.digest_algorithm
    }

    #[inline]
    pub fn hmac_algorithm(&self) -> hmac::Algorithm {
        self.hmac_algorithm
    }

    /// Hash of the concatenated handshake messages.
    pub fn transcript_hash(&self, transcript: &[u8]) -> Vec<u8> {
        digest::digest(self.digest_algorithm, transcript)
            .as_ref()
            .to_vec()
    }
}

/// Resolve a list of configured cipher suite names.
///
/// An empty list selects [`DEFAULT_CIPHER_SUITES`].
pub fn parse_cipher_suites<S: AsRef<str>>(names: &[S]) -> io::Result<Vec<CipherSuite>> {
    if names.is_empty() {
        return Ok(DEFAULT_CIPHER_SUITES.to_vec());
    }
    let mut suites = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let suite = CipherSuite::from_name(name).ok_or_else(|| {
            let valid: Vec<&str> = DEFAULT_CIPHER_SUITES.iter().map(|cs| cs.name()).collect();
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "unknown cipher_suite: {} (valid values: {})",
                    name,
                    valid.join(", ")
                ),
            )
        })?;
        if !suites.contains(&suite) {
            suites.push(suite);
        }
    }
    Ok(suites)
}

impl std::fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::fmt::LowerHex for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.id, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_name() {
        let cs = CipherSuite::from_id(0x1302).unwrap();
        assert_eq!(cs, CipherSuite::AES_256_GCM_SHA384);
        assert_eq!(cs.hash_len(), 48);
        assert_eq!(cs.key_len(), 32);
        assert_eq!(
            CipherSuite::from_name("tls_chacha20_poly1305_sha256"),
            Some(CipherSuite::CHACHA20_POLY1305_SHA256)
        );
        assert!(CipherSuite::from_id(0xc02f).is_none());
    }

    #[test]
    fn test_parse_cipher_suites_empty_is_default() {
        let suites = parse_cipher_suites::<&str>(&[]).unwrap();
        assert_eq!(suites, DEFAULT_CIPHER_SUITES.to_vec());
    }

    #[test]
    fn test_parse_cipher_suites_unknown_name() {
        let err = parse_cipher_suites(&["TLS_AES_128_GCM_SHA256", "TLS_RSA_WITH_RC4"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().starts_with("unknown cipher_suite: TLS_RSA_WITH_RC4"));
    }

    #[test]
    fn test_parse_cipher_suites_dedup() {
        let suites =
            parse_cipher_suites(&["TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384"]).unwrap();
        assert_eq!(suites, vec![CipherSuite::AES_256_GCM_SHA384]);
    }
}
