use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::ServerCertVerifier;

use super::connection::{ConnectionState, TlsConnection};
use super::TlsEngine;
use crate::async_stream::AsyncStream;
use crate::crypto::{CryptoConnection, CryptoTlsStream, perform_crypto_handshake};
use crate::rustls_util::webpki_server_verifier;
use crate::tls13::{CipherSuite, ClientHelloProfile, Tls13ClientConfig, Tls13ClientConnection};

const HANDSHAKE_BUFFER_SIZE: usize = 16384 + 256 + 5;

/// Client-only engine whose ClientHello layout follows a browser profile.
#[derive(Debug, Clone)]
pub struct FingerprintTlsEngine {
    server_name: String,
    next_protos: Vec<String>,
    cipher_suites: Vec<CipherSuite>,
    profile: ClientHelloProfile,
    verifier: Option<Arc<dyn ServerCertVerifier>>,
}

impl FingerprintTlsEngine {
    pub fn new(
        server_name: String,
        next_protos: Vec<String>,
        cipher_suites: Vec<CipherSuite>,
        profile: ClientHelloProfile,
        verify: bool,
    ) -> std::io::Result<Self> {
        let verifier = if verify {
            Some(webpki_server_verifier()?)
        } else {
            None
        };
        Ok(Self {
            server_name,
            next_protos,
            cipher_suites,
            profile,
            verifier,
        })
    }

    fn tls13_config(&self) -> Tls13ClientConfig {
        Tls13ClientConfig {
            server_name: self.server_name.clone(),
            alpn_protocols: self
                .next_protos
                .iter()
                .map(|p| p.as_bytes().to_vec())
                .collect(),
            profile: self.profile,
            cipher_suites: self.cipher_suites.clone(),
            authenticator: None,
            verifier: self.verifier.clone(),
        }
    }
}

#[async_trait]
impl TlsEngine for FingerprintTlsEngine {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn set_server_name(&mut self, server_name: String) {
        self.server_name = server_name;
    }

    fn next_protos(&self) -> &[String] {
        &self.next_protos
    }

    fn set_next_protos(&mut self, next_protos: Vec<String>) {
        self.next_protos = next_protos;
    }

    fn clone_engine(&self) -> Box<dyn TlsEngine> {
        Box::new(self.clone())
    }

    async fn client(&self, mut stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        let mut connection =
            CryptoConnection::new_tls13_client(Tls13ClientConnection::new(self.tls13_config())?);
        perform_crypto_handshake(&mut connection, &mut stream, HANDSHAKE_BUFFER_SIZE).await?;

        let state = ConnectionState::from_crypto(&connection);
        Ok(TlsConnection::new(
            Box::new(CryptoTlsStream::new(stream, connection)),
            state,
        ))
    }

    async fn server(&self, _stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "fingerprint engine has no server role",
        ))
    }
}
