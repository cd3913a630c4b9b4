//! Server role of the camouflage handshake.
//!
//! A ClientHello whose random verifies under the shared secret is answered by the hand-rolled
//! TLS 1.3 server, which stamps its own ServerHello. Anything else is replayed record by record
//! into a rustls server holding the cover certificate; the resulting session is relayed to the
//! fallback site when one is configured and drained otherwise.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use super::jls_client_hello::{ParsedClientHello, read_client_hello};
use super::jls_error::{Role, authentication_failure};
use super::jls_secret::JlsSecret;
use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::crypto::{CryptoConnection, CryptoTlsStream, perform_crypto_handshake};
use crate::direct::dial_tcp;
use crate::rustls_util::{create_identity_server_config, feed_rustls_server_connection};
use crate::server_identity::ServerIdentity;
use crate::tls13::{CipherSuite, HelloAuthenticator, Tls13ServerConfig, Tls13ServerConnection};

const HANDSHAKE_BUFFER_SIZE: usize = 16384 + 256 + 5;
const COVER_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct JlsServerConfig {
    secret: Arc<JlsSecret>,
    server_name: String,
    identity: Arc<ServerIdentity>,
    tls13_config: Tls13ServerConfig,
    cover_config: Arc<rustls::ServerConfig>,
    fallback: Option<NetLocation>,
}

impl std::fmt::Debug for JlsServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JlsServerConfig")
            .field("server_name", &self.server_name)
            .field("identity", &self.identity)
            .field("tls13_config", &self.tls13_config)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl JlsServerConfig {
    /// Both the authenticated and the cover handshake present the certificate from `identity`.
    ///
    /// `tls12_cipher_suites` only affects the cover handshake; the authenticated one is TLS 1.3.
    pub fn new(
        secret: Arc<JlsSecret>,
        server_name: String,
        alpn_protocols: &[String],
        cipher_suites: &[CipherSuite],
        tls12_cipher_suites: &[rustls::CipherSuite],
        identity: Arc<ServerIdentity>,
        fallback: Option<NetLocation>,
    ) -> std::io::Result<Self> {
        if server_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "fallback website is needed",
            ));
        }

        let cover_config = create_identity_server_config(
            identity.clone(),
            alpn_protocols,
            cipher_suites,
            tls12_cipher_suites,
        )?;
        let certified_key = identity.certified_key()?;
        let authenticator: Arc<dyn HelloAuthenticator> = secret.clone();

        Ok(Self {
            secret,
            server_name,
            identity,
            tls13_config: Tls13ServerConfig {
                cipher_suites: cipher_suites.to_vec(),
                alpn_protocols: alpn_protocols
                    .iter()
                    .map(|s| s.as_bytes().to_vec())
                    .collect(),
                certified_key,
                authenticator: Some(authenticator),
            },
            cover_config,
            fallback,
        })
    }

    /// The hand-rolled server's settings with the identity's current certificate.
    fn authenticated_config(&self) -> std::io::Result<Cow<'_, Tls13ServerConfig>> {
        let certified_key = self.identity.certified_key()?;
        if Arc::ptr_eq(&certified_key, &self.tls13_config.certified_key) {
            return Ok(Cow::Borrowed(&self.tls13_config));
        }
        let mut config = self.tls13_config.clone();
        config.certified_key = certified_key;
        Ok(Cow::Owned(config))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn set_server_name(&mut self, server_name: String) {
        self.server_name = server_name;
    }

    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.tls13_config.alpn_protocols
    }

    /// Applies to both the authenticated and the cover handshake.
    pub fn set_alpn_protocols(&mut self, alpn_protocols: &[String]) {
        let alpn: Vec<Vec<u8>> = alpn_protocols
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        let mut cover_config = (*self.cover_config).clone();
        cover_config.alpn_protocols = alpn.clone();
        self.cover_config = Arc::new(cover_config);
        self.tls13_config.alpn_protocols = alpn;
    }

    pub fn fallback(&self) -> Option<&NetLocation> {
        self.fallback.as_ref()
    }
}

pub async fn server_handshake<S>(
    config: &JlsServerConfig,
    mut stream: S,
) -> std::io::Result<CryptoTlsStream<S>>
where
    S: AsyncStream + 'static,
{
    let client_hello = read_client_hello(&mut stream).await?;

    let authenticated =
        client_hello.info.offers_tls13() && config.secret.check(&client_hello.message);
    if authenticated {
        let tls13_config = config.authenticated_config()?;
        let server = Tls13ServerConnection::new(&tls13_config, &client_hello.message)?;
        let mut connection = CryptoConnection::new_tls13_server(server);
        perform_crypto_handshake(&mut connection, &mut stream, HANDSHAKE_BUFFER_SIZE).await?;
        log::debug!(
            "camouflage client authenticated (server name {:?})",
            client_hello.requested_server_name()
        );
        return Ok(CryptoTlsStream::new(stream, connection));
    }

    log::info!(
        "camouflage authentication failed (server name {:?}), serving cover site",
        client_hello.requested_server_name()
    );
    spawn_cover_session(
        config.cover_config.clone(),
        config.fallback.clone(),
        client_hello,
        stream,
    );
    Err(authentication_failure(
        Role::Server,
        config.server_name.clone(),
    ))
}

fn spawn_cover_session<S>(
    cover_config: Arc<rustls::ServerConfig>,
    fallback: Option<NetLocation>,
    client_hello: ParsedClientHello,
    stream: S,
) where
    S: AsyncStream + 'static,
{
    tokio::spawn(async move {
        let result = tokio::time::timeout(
            COVER_SESSION_TIMEOUT,
            run_cover_session(cover_config, fallback, client_hello, stream),
        )
        .await;
        match result {
            Ok(Ok(())) => log::debug!("cover session finished"),
            Ok(Err(e)) => log::debug!("cover session failed: {}", e),
            Err(_) => log::debug!("cover session timed out"),
        }
    });
}

/// Complete a genuine TLS handshake over the recorded ClientHello, then serve cover traffic.
async fn run_cover_session<S>(
    cover_config: Arc<rustls::ServerConfig>,
    fallback: Option<NetLocation>,
    client_hello: ParsedClientHello,
    mut stream: S,
) -> std::io::Result<()>
where
    S: AsyncStream,
{
    let mut server = rustls::ServerConnection::new(cover_config).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to create cover connection: {e}"),
        )
    })?;

    for record in &client_hello.records {
        feed_rustls_server_connection(&mut server, record)?;
        server.process_new_packets().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("cover handshake rejected ClientHello: {e}"),
            )
        })?;
    }

    let mut connection = CryptoConnection::new_rustls_server(server);
    perform_crypto_handshake(&mut connection, &mut stream, HANDSHAKE_BUFFER_SIZE).await?;
    let mut tls_stream = CryptoTlsStream::new(stream, connection);

    match fallback {
        Some(location) => {
            let mut upstream = dial_tcp(&location).await?;
            log::debug!("relaying cover session to {}", location);
            tokio::io::copy_bidirectional(&mut tls_stream, &mut upstream).await?;
        }
        None => {
            tokio::io::copy(&mut tls_stream, &mut tokio::io::sink()).await?;
        }
    }
    Ok(())
}
