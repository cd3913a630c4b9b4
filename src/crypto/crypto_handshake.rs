//! Generic handshake driver that works for every `CryptoConnection` variant.
//!
//! Following tokio-rustls, the connection's `wants_read()` and `wants_write()`
//! guide the loop instead of assumptions about packet boundaries or
//! version-specific message patterns.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::crypto_connection::{CryptoConnection, feed_crypto_connection};

/// Run the handshake to completion over `stream`.
///
/// Returns an error on EOF during the handshake, on a TLS processing failure
/// (certificate validation, protocol error, ...), on I/O errors, or if the
/// handshake stalls.
pub async fn perform_crypto_handshake<S>(
    connection: &mut CryptoConnection,
    stream: &mut S,
    buffer_size: usize,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    perform_crypto_handshake_until(connection, stream, buffer_size, |_| false)
        .await
        .map(|_| ())
}

/// Like [`perform_crypto_handshake`], but checks `interrupt` after every batch of
/// processed records and returns `Ok(true)` as soon as it fires, leaving the
/// connection mid-handshake with any pending output still queued.
///
/// Returns `Ok(false)` when the handshake completed without interruption.
pub async fn perform_crypto_handshake_until<S, F>(
    connection: &mut CryptoConnection,
    stream: &mut S,
    buffer_size: usize,
    mut interrupt: F,
) -> std::io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    F: FnMut(&CryptoConnection) -> bool,
{
    log::debug!("TLS handshake starting");

    let mut iteration = 0;
    let mut eof = false;

    // Pre-allocate read buffer once, reused across all iterations
    let mut read_buf = vec![0u8; buffer_size];

    // records left buffered by an earlier interrupted run
    if connection.is_handshaking() {
        connection.process_new_packets()?;
    }

    loop {
        iteration += 1;
        let until_handshaked = connection.is_handshaking();

        log::trace!(
            "TLS handshake iteration {}: is_handshaking={}, wants_read={}, wants_write={}",
            iteration,
            connection.is_handshaking(),
            connection.wants_read(),
            connection.wants_write()
        );

        if !connection.wants_read() && !connection.wants_write() {
            if connection.is_handshaking() {
                log::error!("TLS handshake stalled: neither wants_read nor wants_write");
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "TLS handshake stalled: neither wants_read nor wants_write",
                ));
            }
            log::debug!(
                "TLS handshake complete (early exit) after {} iterations",
                iteration
            );
            break;
        }

        // Phase 1: drain all pending writes and flush once
        if write_pending_data(connection, stream).await? {
            stream.flush().await?;
        }

        // Phase 2: read ONCE if still handshaking.
        //
        // The read blocks, so unlike tokio-rustls we cannot loop on wants_read().
        // Nothing is read after the handshake completes: wants_read() may stay true
        // for post-handshake messages and we would block forever.
        if !eof && connection.is_handshaking() && connection.wants_read() {
            match read_and_process_data(connection, stream, &mut read_buf).await {
                Ok(0) => {
                    log::debug!("TLS handshake: EOF from peer");
                    eof = true;
                }
                Ok(n) => {
                    log::trace!("TLS handshake: read and processed {} bytes", n);
                    if connection.is_handshaking() && interrupt(connection) {
                        log::debug!("TLS handshake interrupted at iteration {}", iteration);
                        return Ok(true);
                    }
                }
                Err(e) => {
                    try_last_gasp_write(connection, stream).await;
                    return Err(e);
                }
            }
        }

        // If the handshake just completed but there are pending writes, loop to flush them
        // (matches rustls complete_io behavior)
        if until_handshaked && !connection.is_handshaking() && connection.wants_write() {
            continue;
        }

        match (eof, connection.is_handshaking()) {
            (true, true) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "EOF during TLS handshake",
                ));
            }
            (_, false) => {
                log::debug!("TLS handshake complete after {} iterations", iteration);
                break;
            }
            (false, true) => {
                if iteration > 100 {
                    log::error!("TLS handshake exceeded 100 iterations");
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "TLS handshake exceeded maximum iterations",
                    ));
                }
            }
        }
    }

    Ok(false)
}

/// Write all pending TLS data from the connection to the stream (without flushing).
///
/// Returns true if any data was written.
async fn write_pending_data<S>(
    connection: &mut CryptoConnection,
    stream: &mut S,
) -> std::io::Result<bool>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut write_buf = Vec::new();
    while connection.wants_write() {
        connection.write_tls(&mut write_buf)?;
    }

    if write_buf.is_empty() {
        return Ok(false);
    }
    stream.write_all(&write_buf).await?;
    Ok(true)
}

/// Read once from the stream, feed everything to the connection and process it.
///
/// Returns the number of bytes read (0 indicates EOF).
async fn read_and_process_data<S>(
    connection: &mut CryptoConnection,
    stream: &mut S,
    read_buf: &mut [u8],
) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let n = stream.read(read_buf).await?;
    if n == 0 {
        return Ok(0);
    }

    feed_crypto_connection(connection, &read_buf[..n])?;
    connection.process_new_packets().map_err(|e| {
        log::debug!("TLS error processing packets: {}", e);
        e
    })?;

    Ok(n)
}

/// Best-effort write of any alert queued by a failed handshake.
async fn try_last_gasp_write<S>(connection: &mut CryptoConnection, stream: &mut S)
where
    S: AsyncWrite + Unpin + ?Sized,
{
    if !connection.wants_write() {
        return;
    }

    let mut alert_buf = Vec::new();
    while connection.wants_write() {
        if connection.write_tls(&mut alert_buf).is_err() {
            return;
        }
    }

    if !alert_buf.is_empty() {
        log::debug!(
            "TLS: sending last-gasp alert ({} bytes) before closing",
            alert_buf.len()
        );
        let _ = stream.write_all(&alert_buf).await;
        let _ = stream.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tls13::{
        ClientHelloProfile, HelloAuth, HelloAuthenticator, Tls13ClientConfig, Tls13ClientConnection,
        Tls13ServerConfig, Tls13ServerConnection,
    };

    fn rustls_server(name: &str) -> CryptoConnection {
        let cert = crate::mkcert::generate_certificate(&crate::mkcert::system_time(), name).unwrap();
        let config = crate::rustls_util::create_server_config(
            cert.cert_chain(),
            cert.private_key_der(),
            &[],
            &[],
        )
        .unwrap();
        CryptoConnection::new_rustls_server(rustls::ServerConnection::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_rustls_client_and_server() {
        let (mut a, mut b) = tokio::io::duplex(65536);
        let client_config = crate::rustls_util::create_client_config(false, &[], &[]).unwrap();
        let mut client = CryptoConnection::new_rustls_client(
            rustls::ClientConnection::new(client_config, "cover.example".try_into().unwrap())
                .unwrap(),
        );
        let mut server = rustls_server("cover.example");

        let (c, s) = tokio::join!(
            perform_crypto_handshake(&mut client, &mut a, 16384),
            perform_crypto_handshake(&mut server, &mut b, 16384)
        );
        c.unwrap();
        s.unwrap();
        assert!(!client.is_handshaking());
        assert_eq!(server.server_name(), Some("cover.example"));
        assert_eq!(client.protocol_version(), Some("TLSv1_3"));
    }

    #[tokio::test]
    async fn test_tls13_client_against_tls13_server() {
        let (mut a, mut b) = tokio::io::duplex(65536);
        let tls13_client = Tls13ClientConnection::new(Tls13ClientConfig {
            server_name: "cover.example".to_string(),
            profile: ClientHelloProfile::Chrome,
            ..Default::default()
        })
        .unwrap();
        let client_hello = tls13_client.client_hello().to_vec();
        let mut client = CryptoConnection::new_tls13_client(tls13_client);

        let cert = crate::mkcert::generate_certificate(&crate::mkcert::system_time(), "cover.example")
            .unwrap();
        let server_config = Tls13ServerConfig {
            cipher_suites: Vec::new(),
            alpn_protocols: Vec::new(),
            certified_key: crate::rustls_util::load_certified_key(
                cert.cert_chain(),
                cert.private_key_der(),
            )
            .unwrap(),
            authenticator: None,
        };

        let client_task = async {
            perform_crypto_handshake(&mut client, &mut a, 16384).await
        };
        let server_task = async {
            // consume the ClientHello record the client sends
            let mut record = vec![0u8; 5 + client_hello.len()];
            b.read_exact(&mut record).await?;
            let mut server = CryptoConnection::new_tls13_server(Tls13ServerConnection::new(
                &server_config,
                &record[5..],
            )?);
            perform_crypto_handshake(&mut server, &mut b, 16384).await?;
            Ok::<_, std::io::Error>(server)
        };
        let (c, s) = tokio::join!(client_task, server_task);
        c.unwrap();
        let server = s.unwrap();
        assert!(!server.is_handshaking());
        assert_eq!(client.negotiated_cipher_suite(), Some("TLS_AES_128_GCM_SHA256"));
        assert!(client.peer_certificates().is_some());
    }

    #[derive(Debug)]
    struct RejectAll;

    impl HelloAuthenticator for RejectAll {
        fn stamp(&self, _message: &mut [u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn check(&self, _message: &[u8]) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_interrupt_after_rejected_server_hello() {
        let (mut a, mut b) = tokio::io::duplex(65536);
        let mut client = CryptoConnection::new_tls13_client(
            Tls13ClientConnection::new(Tls13ClientConfig {
                server_name: "cover.example".to_string(),
                authenticator: Some(Arc::new(RejectAll)),
                ..Default::default()
            })
            .unwrap(),
        );
        let mut server = rustls_server("cover.example");

        let server_task = tokio::spawn(async move {
            perform_crypto_handshake(&mut server, &mut b, 16384).await
        });
        let interrupted = perform_crypto_handshake_until(&mut client, &mut a, 16384, |conn| {
            matches!(conn, CryptoConnection::Tls13Client(c) if c.server_hello_auth() == HelloAuth::Rejected)
        })
        .await
        .unwrap();
        assert!(interrupted);
        assert!(client.is_handshaking());

        // the same connection still completes against the real server
        perform_crypto_handshake(&mut client, &mut a, 16384).await.unwrap();
        assert!(!client.is_handshaking());
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_eof_during_handshake() {
        let (mut a, b) = tokio::io::duplex(65536);
        drop(b);
        let mut client = CryptoConnection::new_tls13_client(
            Tls13ClientConnection::new(Tls13ClientConfig {
                server_name: "cover.example".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let err = perform_crypto_handshake(&mut client, &mut a, 16384)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe
        ));
    }
}
