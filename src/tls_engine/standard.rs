use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;

use super::connection::{ConnectionState, TlsConnection};
use super::TlsEngine;
use crate::async_stream::AsyncStream;

impl<IO: AsyncStream> AsyncStream for tokio_rustls::client::TlsStream<IO> {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        Some(self.get_ref().0)
    }
}

impl<IO: AsyncStream> AsyncStream for tokio_rustls::server::TlsStream<IO> {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        Some(self.get_ref().0)
    }
}

fn alpn_bytes(protos: &[String]) -> Vec<Vec<u8>> {
    protos.iter().map(|p| p.as_bytes().to_vec()).collect()
}

/// rustls through tokio-rustls.
#[derive(Debug, Clone)]
pub struct StandardTlsEngine {
    server_name: String,
    next_protos: Vec<String>,
    client_config: Option<Arc<rustls::ClientConfig>>,
    server_config: Option<Arc<rustls::ServerConfig>>,
}

impl StandardTlsEngine {
    pub fn new_client(server_name: String, client_config: Arc<rustls::ClientConfig>) -> Self {
        let next_protos = client_config
            .alpn_protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        Self {
            server_name,
            next_protos,
            client_config: Some(client_config),
            server_config: None,
        }
    }

    pub fn new_server(server_name: String, server_config: Arc<rustls::ServerConfig>) -> Self {
        let next_protos = server_config
            .alpn_protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        Self {
            server_name,
            next_protos,
            client_config: None,
            server_config: Some(server_config),
        }
    }
}

#[async_trait]
impl TlsEngine for StandardTlsEngine {
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
        if let Some(config) = self.client_config.as_mut() {
            let mut updated = (**config).clone();
            updated.alpn_protocols = alpn_bytes(&next_protos);
            *config = Arc::new(updated);
        }
        if let Some(config) = self.server_config.as_mut() {
            let mut updated = (**config).clone();
            updated.alpn_protocols = alpn_bytes(&next_protos);
            *config = Arc::new(updated);
        }
        self.next_protos = next_protos;
    }

    fn clone_engine(&self) -> Box<dyn TlsEngine> {
        Box::new(self.clone())
    }

    async fn client(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        let config = self.client_config.clone().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "standard engine was not configured as a client",
            )
        })?;
        let server_name = ServerName::try_from(self.server_name.clone()).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid server name {}: {}", self.server_name, e),
            )
        })?;

        let tls_stream = tokio_rustls::TlsConnector::from(config)
            .connect(server_name, stream)
            .await?;
        let state = ConnectionState::from_rustls(tls_stream.get_ref().1, Some(&self.server_name));
        Ok(TlsConnection::new(Box::new(tls_stream), state))
    }

    async fn server(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<TlsConnection> {
        let config = self.server_config.clone().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "standard engine was not configured as a server",
            )
        })?;

        let tls_stream = tokio_rustls::TlsAcceptor::from(config)
            .accept(stream)
            .await?;
        let connection = tls_stream.get_ref().1;
        let state = ConnectionState::from_rustls(connection, connection.server_name());
        Ok(TlsConnection::new(Box::new(tls_stream), state))
    }
}
