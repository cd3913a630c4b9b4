//! Token sealing for the hello random field.
//!
//! authData is a ClientHello or ServerHello handshake message (including its 4-byte header) with
//! the 32-byte random zeroed. Both sides derive
//!
//!   key   = SHA-256(password || authData)
//!   nonce = SHA-256(iv || authData)
//!
//! and seal 16 random bytes with AES-256-GCM using the full 32-byte digest as nonce and no
//! associated data. The 16-byte ciphertext plus the 16-byte tag fill the random field exactly.

use std::io::{Error, ErrorKind, Result};

use aes_gcm::aead::consts::U32;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use aws_lc_rs::digest;
use rand::RngCore;

use crate::tls13::{HELLO_RANDOM_LEN, HELLO_RANDOM_OFFSET, HelloAuthenticator};

type TokenCipher = AesGcm<Aes256, U32>;

const TOKEN_PLAINTEXT_LEN: usize = 16;

/// The shared secret of a camouflage client/server pair.
#[derive(Clone)]
pub struct JlsSecret {
    password: Vec<u8>,
    iv: Vec<u8>,
}

impl std::fmt::Debug for JlsSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JlsSecret").finish_non_exhaustive()
    }
}

impl JlsSecret {
    pub fn new(password: impl Into<Vec<u8>>, iv: impl Into<Vec<u8>>) -> Result<Self> {
        let password = password.into();
        let iv = iv.into();
        if password.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "empty password"));
        }
        if iv.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "empty iv"));
        }
        Ok(Self { password, iv })
    }

    fn derive(&self, auth_data: &[u8]) -> Result<(TokenCipher, [u8; 32])> {
        let mut key_context = digest::Context::new(&digest::SHA256);
        key_context.update(&self.password);
        key_context.update(auth_data);
        let key = key_context.finish();

        let mut nonce_context = digest::Context::new(&digest::SHA256);
        nonce_context.update(&self.iv);
        nonce_context.update(auth_data);
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(nonce_context.finish().as_ref());

        let cipher = TokenCipher::new_from_slice(key.as_ref())
            .map_err(|_| Error::other("invalid token key length"))?;
        Ok((cipher, nonce))
    }

    /// Seal a fresh random payload bound to `auth_data`.
    pub fn seal(&self, auth_data: &[u8]) -> Result<[u8; HELLO_RANDOM_LEN]> {
        let (cipher, nonce) = self.derive(auth_data)?;

        let mut plaintext = [0u8; TOKEN_PLAINTEXT_LEN];
        rand::rng().fill_bytes(&mut plaintext);

        let sealed = cipher
            .encrypt(Nonce::<U32>::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| Error::other("failed to seal token"))?;

        sealed.as_slice().try_into().map_err(|_| {
            Error::other(format!(
                "sealed token is {} bytes, expected {}",
                sealed.len(),
                HELLO_RANDOM_LEN
            ))
        })
    }

    /// Whether `token` was sealed by a holder of this secret over `auth_data`.
    pub fn verify(&self, auth_data: &[u8], token: &[u8]) -> bool {
        if token.len() != HELLO_RANDOM_LEN {
            return false;
        }
        let Ok((cipher, nonce)) = self.derive(auth_data) else {
            return false;
        };
        cipher
            .decrypt(Nonce::<U32>::from_slice(&nonce), token)
            .is_ok()
    }
}

/// Copy of `message` with the hello random zeroed.
pub fn auth_data(message: &[u8]) -> Result<Vec<u8>> {
    let end = HELLO_RANDOM_OFFSET + HELLO_RANDOM_LEN;
    if message.len() < end {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("hello message too short for random: {} bytes", message.len()),
        ));
    }
    let mut data = message.to_vec();
    data[HELLO_RANDOM_OFFSET..end].fill(0);
    Ok(data)
}

impl HelloAuthenticator for JlsSecret {
    fn stamp(&self, message: &mut [u8]) -> Result<()> {
        let data = auth_data(message)?;
        let token = self.seal(&data)?;
        message[HELLO_RANDOM_OFFSET..HELLO_RANDOM_OFFSET + HELLO_RANDOM_LEN].copy_from_slice(&token);
        Ok(())
    }

    fn check(&self, message: &[u8]) -> bool {
        match auth_data(message) {
            Ok(data) => self.verify(
                &data,
                &message[HELLO_RANDOM_OFFSET..HELLO_RANDOM_OFFSET + HELLO_RANDOM_LEN],
            ),
            Err(_) => false,
        }
    }
}
