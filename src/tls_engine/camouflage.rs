use async_trait::async_trait;

use super::connection::{ConnectionState, TlsConnection};
use super::TlsEngine;
use crate::async_stream::AsyncStream;
use crate::jls::{JlsClientConfig, JlsServerConfig, client_handshake, server_handshake};

#[derive(Debug, Clone)]
enum Role {
    Client(JlsClientConfig),
    Server(JlsServerConfig),
}

/// Camouflage handshake in either role. Failed authentication surfaces as a
/// `PermissionDenied` error; see [`crate::jls::is_authentication_failure`].
#[derive(Debug, Clone)]
pub struct CamouflageTlsEngine {
    role: Role,
    next_protos: Vec<String>,
}

fn alpn_strings(protos: &[Vec<u8>]) -> Vec<String> {
    protos
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

impl CamouflageTlsEngine {
    pub fn new_client(config: JlsClientConfig) -> Self {
        Self {
            next_protos: alpn_strings(&config.alpn_protocols),
            role: Role::Client(config),
        }
    }

    pub fn new_server(config: JlsServerConfig) -> Self {
        Self {
            next_protos: alpn_strings(config.alpn_protocols()),
            role: Role::Server(config),
        }
    }

    fn unsupported(role: &str) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("camouflage engine was not configured as a {role}"),
        )
    }
}

#[async_trait]
impl TlsEngine for CamouflageTlsEngine {
    fn server_name(&self) -> &str {
        match &self.role {
            Role::Client(config) => &config.server_name,
            Role::Server(config) => config.server_name(),
        }
    }

    fn set_server_name(&mut self, server_name: String) {
        match &mut self.role {
            Role::Client(config) => config.server_name = server_name,
            Role::Server(config) => config.set_server_name(server_name),
        }
    }

    fn next_protos(&self) -> &[String] {
        &self.next_protos
    }

    fn set_next_protos(&mut self, next_protos: Vec<String>) {
        match &mut self.role {
            Role::Client(config) => {
                config.alpn_protocols = next_protos.iter().map(|p| p.as_bytes().to_vec()).collect()
            }
            Role::Server(config) => config.set_alpn_protocols(&next_protos),
        }
        self.next_protos = next_protos;
    }

    fn clone_engine(&self) -> Box<dyn TlsEngine> {
        Box::new(self.clone())
    }

    async fn client(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        let Role::Client(config) = &self.role else {
            return Err(Self::unsupported("client"));
        };
        let tls_stream = client_handshake(config, stream).await?;
        let state = ConnectionState::from_crypto(tls_stream.get_ref().1);
        Ok(TlsConnection::new(Box::new(tls_stream), state))
    }

    async fn server(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        let Role::Server(config) = &self.role else {
            return Err(Self::unsupported("server"));
        };
        let tls_stream = server_handshake(config, stream).await?;
        let state = ConnectionState::from_crypto(tls_stream.get_ref().1);
        Ok(TlsConnection::new(Box::new(tls_stream), state))
    }
}
