//! Client role of the camouflage handshake.
//!
//! The ClientHello random carries a token sealed under the shared secret. If the ServerHello
//! random does not verify, the caller gets an authentication failure right away while a detached
//! task finishes the handshake on the same socket and closes it cleanly, so the trace looks like
//! an ordinary TLS session.

use std::sync::Arc;
use std::time::Duration;

use super::jls_error::{Role, authentication_failure};
use super::jls_secret::JlsSecret;
use crate::async_stream::AsyncStream;
use crate::crypto::{
    CryptoConnection, CryptoTlsStream, perform_crypto_handshake, perform_crypto_handshake_until,
};
use crate::tls13::{
    CipherSuite, ClientHelloProfile, HelloAuth, HelloAuthenticator, Tls13ClientConfig,
    Tls13ClientConnection,
};

const HANDSHAKE_BUFFER_SIZE: usize = 16384 + 256 + 5;
const DECOY_TIMEOUT: Duration = Duration::from_secs(30);
const DECOY_LINGER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct JlsClientConfig {
    pub secret: Arc<JlsSecret>,
    pub server_name: String,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub cipher_suites: Vec<CipherSuite>,
    pub profile: ClientHelloProfile,
}

impl JlsClientConfig {
    fn tls13_config(&self) -> Tls13ClientConfig {
        let authenticator: Arc<dyn HelloAuthenticator> = self.secret.clone();
        Tls13ClientConfig {
            server_name: self.server_name.clone(),
            alpn_protocols: self.alpn_protocols.clone(),
            profile: self.profile,
            cipher_suites: self.cipher_suites.clone(),
            authenticator: Some(authenticator),
            // the token authenticates the server
            verifier: None,
        }
    }
}

fn server_hello_rejected(connection: &CryptoConnection) -> bool {
    match connection {
        CryptoConnection::Tls13Client(conn) => conn.server_hello_auth().is_rejected(),
        _ => false,
    }
}

fn server_hello_auth(connection: &CryptoConnection) -> HelloAuth {
    match connection {
        CryptoConnection::Tls13Client(conn) => conn.server_hello_auth(),
        _ => HelloAuth::Unchecked,
    }
}

pub async fn client_handshake<S>(
    config: &JlsClientConfig,
    mut stream: S,
) -> std::io::Result<CryptoTlsStream<S>>
where
    S: AsyncStream + 'static,
{
    let mut connection =
        CryptoConnection::new_tls13_client(Tls13ClientConnection::new(config.tls13_config())?);

    let interrupted = perform_crypto_handshake_until(
        &mut connection,
        &mut stream,
        HANDSHAKE_BUFFER_SIZE,
        server_hello_rejected,
    )
    .await?;

    if interrupted {
        log::info!(
            "camouflage server for {} failed authentication, continuing as decoy",
            config.server_name
        );
        spawn_decoy(connection, stream, config.server_name.clone());
        return Err(authentication_failure(
            Role::Client,
            config.server_name.clone(),
        ));
    }

    match server_hello_auth(&connection) {
        HelloAuth::Verified => {}
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("handshake completed with ServerHello token state {:?}", other),
            ));
        }
    }

    log::debug!("camouflage handshake with {} authenticated", config.server_name);
    Ok(CryptoTlsStream::new(stream, connection))
}

/// Finish the handshake as a plain TLS client in the background, then close the session the
/// way a browser does: close_notify, and whatever the server still sends is read and dropped.
///
/// Errors are only logged at debug level.
fn spawn_decoy<S>(mut connection: CryptoConnection, mut stream: S, server_name: String)
where
    S: AsyncStream + 'static,
{
    tokio::spawn(async move {
        let result = tokio::time::timeout(DECOY_TIMEOUT, async {
            perform_crypto_handshake(&mut connection, &mut stream, HANDSHAKE_BUFFER_SIZE).await?;
            CryptoTlsStream::new(stream, connection)
                .close_and_drain(DECOY_LINGER)
                .await
        })
        .await;

        match result {
            Ok(Ok(())) => log::debug!("decoy handshake with {} completed", server_name),
            Ok(Err(e)) => log::debug!("decoy handshake with {} failed: {}", server_name, e),
            Err(_) => log::debug!("decoy handshake with {} timed out", server_name),
        }
    });
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::jls::is_authentication_failure;
    use crate::mkcert::{generate_certificate, system_time};

    fn client_config(password: &str) -> JlsClientConfig {
        JlsClientConfig {
            secret: Arc::new(JlsSecret::new(password, "s").unwrap()),
            server_name: "cover.example".to_string(),
            alpn_protocols: Vec::new(),
            cipher_suites: Vec::new(),
            profile: ClientHelloProfile::Firefox,
        }
    }

    #[tokio::test]
    async fn test_rejected_server_gets_complete_decoy_session() {
        let (a, mut b) = tokio::io::duplex(65536);

        // a plain TLS server stands in for a camouflage server holding another password
        let cert = generate_certificate(&system_time(), "cover.example").unwrap();
        let server_config = crate::rustls_util::create_server_config(
            cert.cert_chain(),
            cert.private_key_der(),
            &[],
            &[],
        )
        .unwrap();
        let observer = tokio::spawn(async move {
            let mut server = CryptoConnection::new_rustls_server(
                rustls::ServerConnection::new(server_config).unwrap(),
            );
            // session tickets go out here, after the client Finished
            perform_crypto_handshake(&mut server, &mut b, 16384).await?;
            assert_eq!(server.server_name(), Some("cover.example"));
            let CryptoConnection::RustlsServer(mut server) = server else {
                unreachable!();
            };

            let mut saw_close_notify = false;
            let mut buf = vec![0u8; 16384];
            loop {
                let n = b.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                server.read_tls(&mut &buf[..n])?;
                let state = server.process_new_packets().map_err(std::io::Error::other)?;
                assert_eq!(state.plaintext_bytes_to_read(), 0);
                saw_close_notify |= state.peer_has_closed();
            }
            Ok::<_, std::io::Error>(saw_close_notify)
        });

        let err = client_handshake(&client_config("p1"), a).await.err().unwrap();
        assert!(is_authentication_failure(&err));

        let saw_close_notify = observer.await.unwrap().unwrap();
        assert!(saw_close_notify);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_auth_failure() {
        let (a, b) = tokio::io::duplex(65536);
        drop(b);
        let err = client_handshake(&client_config("p"), a).await.err().unwrap();
        assert!(!is_authentication_failure(&err));
    }
}
