// Pluggable TLS backends behind one client/server handshake interface.

mod camouflage;
mod connection;
mod fingerprint;
mod standard;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::jls::{JlsClientConfig, JlsSecret, JlsServerConfig};
use crate::rustls_util::{create_client_config, create_identity_server_config};
use crate::server_identity::ServerIdentity;
use crate::tls13::{CipherSuite, ClientHelloProfile};

pub use camouflage::CamouflageTlsEngine;
pub use connection::{ConnectionState, TlsConnection};
pub use fingerprint::FingerprintTlsEngine;
pub use standard::StandardTlsEngine;

#[async_trait]
pub trait TlsEngine: Send + Sync + std::fmt::Debug {
    fn server_name(&self) -> &str;

    fn set_server_name(&mut self, server_name: String);

    fn next_protos(&self) -> &[String];

    fn set_next_protos(&mut self, next_protos: Vec<String>);

    /// An independent copy; changing its settings leaves `self` untouched.
    fn clone_engine(&self) -> Box<dyn TlsEngine>;

    async fn client(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection>;

    async fn server(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Standard,
    Fingerprint,
    Camouflage,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Standard => "standard",
            Self::Fingerprint => "fingerprint",
            Self::Camouflage => "camouflage",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct ClientEngineConfig {
    pub kind: EngineKind,
    pub server_name: String,
    pub alpn_protocols: Vec<String>,
    pub cipher_suites: Vec<CipherSuite>,
    pub profile: ClientHelloProfile,
    /// Skip certificate verification (standard and fingerprint only).
    pub insecure: bool,
    pub secret: Option<Arc<JlsSecret>>,
}

#[derive(Debug)]
pub struct ServerEngineConfig {
    pub kind: EngineKind,
    pub server_name: String,
    pub alpn_protocols: Vec<String>,
    pub cipher_suites: Vec<CipherSuite>,
    /// Restricts the TLS 1.2 suites rustls offers (standard server and camouflage cover).
    pub tls12_cipher_suites: Vec<rustls::CipherSuite>,
    pub identity: Arc<ServerIdentity>,
    pub secret: Option<Arc<JlsSecret>>,
    pub fallback: Option<NetLocation>,
}

fn require_secret(secret: Option<Arc<JlsSecret>>) -> std::io::Result<Arc<JlsSecret>> {
    secret.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty password")
    })
}

pub fn build_client_engine(config: ClientEngineConfig) -> std::io::Result<Box<dyn TlsEngine>> {
    let engine: Box<dyn TlsEngine> = match config.kind {
        EngineKind::Standard => {
            let client_config = create_client_config(
                !config.insecure,
                &config.alpn_protocols,
                &config.cipher_suites,
            )?;
            Box::new(StandardTlsEngine::new_client(
                config.server_name,
                client_config,
            ))
        }
        EngineKind::Fingerprint => Box::new(FingerprintTlsEngine::new(
            config.server_name,
            config.alpn_protocols,
            config.cipher_suites,
            config.profile,
            !config.insecure,
        )?),
        EngineKind::Camouflage => {
            let secret = require_secret(config.secret)?;
            Box::new(CamouflageTlsEngine::new_client(JlsClientConfig {
                secret,
                server_name: config.server_name,
                alpn_protocols: config
                    .alpn_protocols
                    .iter()
                    .map(|s| s.as_bytes().to_vec())
                    .collect(),
                cipher_suites: config.cipher_suites,
                profile: config.profile,
            }))
        }
    };
    Ok(engine)
}

pub fn build_server_engine(config: ServerEngineConfig) -> std::io::Result<Box<dyn TlsEngine>> {
    let engine: Box<dyn TlsEngine> = match config.kind {
        EngineKind::Standard => {
            let server_config = create_identity_server_config(
                config.identity,
                &config.alpn_protocols,
                &config.cipher_suites,
                &config.tls12_cipher_suites,
            )?;
            Box::new(StandardTlsEngine::new_server(
                config.server_name,
                server_config,
            ))
        }
        EngineKind::Fingerprint => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "fingerprint engine has no server role",
            ));
        }
        EngineKind::Camouflage => {
            let secret = require_secret(config.secret)?;
            Box::new(CamouflageTlsEngine::new_server(JlsServerConfig::new(
                secret,
                config.server_name,
                &config.alpn_protocols,
                &config.cipher_suites,
                &config.tls12_cipher_suites,
                config.identity,
                config.fallback,
            )?))
        }
    };
    Ok(engine)
}
