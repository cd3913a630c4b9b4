use std::pin::Pin;
use std::task::{Context, Poll};

use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::async_stream::AsyncStream;
use crate::crypto::CryptoConnection;

/// What the handshake negotiated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub version: Option<&'static str>,
    pub cipher_suite: Option<&'static str>,
    pub peer_certificates: Vec<CertificateDer<'static>>,
    pub did_resume: bool,
    pub handshake_complete: bool,
    pub negotiated_protocol: Option<Vec<u8>>,
    pub server_name: Option<String>,
}

impl ConnectionState {
    pub fn from_crypto(connection: &CryptoConnection) -> Self {
        Self {
            version: connection.protocol_version(),
            cipher_suite: connection.negotiated_cipher_suite(),
            peer_certificates: connection
                .peer_certificates()
                .map(|certs| certs.to_vec())
                .unwrap_or_default(),
            did_resume: connection.did_resume(),
            handshake_complete: !connection.is_handshaking(),
            negotiated_protocol: connection.alpn_protocol().map(|p| p.to_vec()),
            server_name: connection.server_name().map(str::to_string),
        }
    }

    pub fn from_rustls(common: &rustls::CommonState, server_name: Option<&str>) -> Self {
        Self {
            version: common.protocol_version().and_then(|v| v.as_str()),
            cipher_suite: common
                .negotiated_cipher_suite()
                .and_then(|cs| cs.suite().as_str()),
            peer_certificates: common
                .peer_certificates()
                .map(|certs| certs.to_vec())
                .unwrap_or_default(),
            did_resume: matches!(common.handshake_kind(), Some(rustls::HandshakeKind::Resumed)),
            handshake_complete: !common.is_handshaking(),
            negotiated_protocol: common.alpn_protocol().map(|p| p.to_vec()),
            server_name: server_name.map(str::to_string),
        }
    }
}

/// An established TLS session as returned by every engine.
pub struct TlsConnection {
    stream: Box<dyn AsyncStream>,
    state: ConnectionState,
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TlsConnection {
    pub fn new(stream: Box<dyn AsyncStream>, state: ConnectionState) -> Self {
        Self { stream, state }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn into_inner(self) -> Box<dyn AsyncStream> {
        self.stream
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl AsyncStream for TlsConnection {
    // the wrapped TLS stream is this layer, so skip straight to its transport
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        self.stream.upstream()
    }
}
