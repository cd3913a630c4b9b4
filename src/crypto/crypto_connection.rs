// Unified connection enum for all cryptographic protocols
//
// This enum mirrors rustls::Connection, allowing rustls and the hand-rolled
// TLS 1.3 connections to be used interchangeably.

use std::io::{self, Read, Write};

use rustls::pki_types::CertificateDer;

use crate::rustls_util::{feed_rustls_client_connection, feed_rustls_server_connection};
use crate::tls13::{
    Tls13ClientConnection, Tls13ServerConnection, feed_tls13_client_connection,
    feed_tls13_server_connection,
};

use super::crypto_reader_writer::{CryptoReader, CryptoWriter};

/// Represents the I/O state after processing packets
#[derive(Debug, Clone, Copy)]
pub struct CryptoIoState {
    /// Number of plaintext bytes available to read
    plaintext_bytes_to_read: usize,
}

impl CryptoIoState {
    pub fn new(plaintext_bytes_to_read: usize) -> Self {
        CryptoIoState {
            plaintext_bytes_to_read,
        }
    }

    /// How many plaintext bytes could be obtained via Read without further I/O
    pub fn plaintext_bytes_to_read(&self) -> usize {
        self.plaintext_bytes_to_read
    }
}

/// Unified connection type supporting multiple TLS implementations
pub enum CryptoConnection {
    /// rustls server-side connection
    RustlsServer(rustls::ServerConnection),
    /// rustls client-side connection
    RustlsClient(rustls::ClientConnection),
    /// hand-rolled TLS 1.3 server-side connection
    Tls13Server(Tls13ServerConnection),
    /// hand-rolled TLS 1.3 client-side connection
    Tls13Client(Tls13ClientConnection),
}

impl CryptoConnection {
    pub fn new_rustls_server(conn: rustls::ServerConnection) -> Self {
        CryptoConnection::RustlsServer(conn)
    }

    pub fn new_rustls_client(conn: rustls::ClientConnection) -> Self {
        CryptoConnection::RustlsClient(conn)
    }

    pub fn new_tls13_server(conn: Tls13ServerConnection) -> Self {
        CryptoConnection::Tls13Server(conn)
    }

    pub fn new_tls13_client(conn: Tls13ClientConnection) -> Self {
        CryptoConnection::Tls13Client(conn)
    }

    pub fn is_server(&self) -> bool {
        matches!(
            self,
            CryptoConnection::RustlsServer(_) | CryptoConnection::Tls13Server(_)
        )
    }

    pub fn is_client(&self) -> bool {
        matches!(
            self,
            CryptoConnection::RustlsClient(_) | CryptoConnection::Tls13Client(_)
        )
    }

    /// Read TLS messages from `rd` into internal buffers
    ///
    /// Returns the number of bytes read, or 0 if the connection is closed.
    /// This does NOT decrypt data - call `process_new_packets()` for that.
    pub fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.read_tls(rd),
            CryptoConnection::RustlsClient(conn) => conn.read_tls(rd),
            CryptoConnection::Tls13Server(conn) => conn.read_tls(rd),
            CryptoConnection::Tls13Client(conn) => conn.read_tls(rd),
        }
    }

    /// Process any buffered TLS messages and update internal state
    ///
    /// This decrypts data and advances the handshake state machine.
    pub fn process_new_packets(&mut self) -> io::Result<CryptoIoState> {
        match self {
            CryptoConnection::RustlsServer(conn) => {
                let io_state = conn.process_new_packets().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("rustls server error processing new packets: {:?}", e),
                    )
                })?;
                Ok(CryptoIoState::new(io_state.plaintext_bytes_to_read()))
            }
            CryptoConnection::RustlsClient(conn) => {
                let io_state = conn.process_new_packets().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("rustls client error processing new packets: {:?}", e),
                    )
                })?;
                Ok(CryptoIoState::new(io_state.plaintext_bytes_to_read()))
            }
            // hand-rolled connections already return io::Error with a meaningful kind
            CryptoConnection::Tls13Server(conn) => {
                let io_state = conn.process_new_packets()?;
                Ok(CryptoIoState::new(io_state.plaintext_bytes_to_read()))
            }
            CryptoConnection::Tls13Client(conn) => {
                let io_state = conn.process_new_packets()?;
                Ok(CryptoIoState::new(io_state.plaintext_bytes_to_read()))
            }
        }
    }

    /// Get a unified reader for reading decrypted plaintext
    pub fn reader(&mut self) -> CryptoReader<'_> {
        match self {
            CryptoConnection::RustlsServer(conn) => CryptoReader::Rustls(conn.reader()),
            CryptoConnection::RustlsClient(conn) => CryptoReader::Rustls(conn.reader()),
            CryptoConnection::Tls13Server(conn) => CryptoReader::Tls13(conn.reader()),
            CryptoConnection::Tls13Client(conn) => CryptoReader::Tls13(conn.reader()),
        }
    }

    /// Get a unified writer for writing plaintext to be encrypted
    pub fn writer(&mut self) -> CryptoWriter<'_> {
        match self {
            CryptoConnection::RustlsServer(conn) => CryptoWriter::Rustls(conn.writer()),
            CryptoConnection::RustlsClient(conn) => CryptoWriter::Rustls(conn.writer()),
            CryptoConnection::Tls13Server(conn) => CryptoWriter::Tls13(conn.writer()),
            CryptoConnection::Tls13Client(conn) => CryptoWriter::Tls13(conn.writer()),
        }
    }

    /// Write any buffered TLS messages to `wr`
    ///
    /// This encrypts any pending plaintext and writes the ciphertext.
    pub fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.write_tls(wr),
            CryptoConnection::RustlsClient(conn) => conn.write_tls(wr),
            CryptoConnection::Tls13Server(conn) => conn.write_tls(wr),
            CryptoConnection::Tls13Client(conn) => conn.write_tls(wr),
        }
    }

    /// If true, the application should call `write_tls()` as soon as possible.
    pub fn wants_write(&self) -> bool {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.wants_write(),
            CryptoConnection::RustlsClient(conn) => conn.wants_write(),
            CryptoConnection::Tls13Server(conn) => conn.wants_write(),
            CryptoConnection::Tls13Client(conn) => conn.wants_write(),
        }
    }

    /// If true, the connection has no buffered plaintext and wants more TLS data.
    pub fn wants_read(&self) -> bool {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.wants_read(),
            CryptoConnection::RustlsClient(conn) => conn.wants_read(),
            CryptoConnection::Tls13Server(conn) => conn.wants_read(),
            CryptoConnection::Tls13Client(conn) => conn.wants_read(),
        }
    }

    pub fn is_handshaking(&self) -> bool {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.is_handshaking(),
            CryptoConnection::RustlsClient(conn) => conn.is_handshaking(),
            CryptoConnection::Tls13Server(conn) => conn.is_handshaking(),
            CryptoConnection::Tls13Client(conn) => conn.is_handshaking(),
        }
    }

    /// Queue a close notification
    ///
    /// Call `write_tls()` to actually send it.
    pub fn send_close_notify(&mut self) {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.send_close_notify(),
            CryptoConnection::RustlsClient(conn) => conn.send_close_notify(),
            CryptoConnection::Tls13Server(conn) => conn.send_close_notify(),
            CryptoConnection::Tls13Client(conn) => conn.send_close_notify(),
        }
    }

    /// Negotiated protocol version name, None while handshaking.
    pub fn protocol_version(&self) -> Option<&'static str> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.protocol_version().and_then(|v| v.as_str()),
            CryptoConnection::RustlsClient(conn) => conn.protocol_version().and_then(|v| v.as_str()),
            CryptoConnection::Tls13Server(conn) => {
                (!conn.is_handshaking()).then_some("TLSv1_3")
            }
            CryptoConnection::Tls13Client(conn) => {
                (!conn.is_handshaking()).then_some("TLSv1_3")
            }
        }
    }

    pub fn negotiated_cipher_suite(&self) -> Option<&'static str> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn
                .negotiated_cipher_suite()
                .and_then(|cs| cs.suite().as_str()),
            CryptoConnection::RustlsClient(conn) => conn
                .negotiated_cipher_suite()
                .and_then(|cs| cs.suite().as_str()),
            CryptoConnection::Tls13Server(conn) => Some(conn.negotiated_cipher_suite().name()),
            CryptoConnection::Tls13Client(conn) => {
                conn.negotiated_cipher_suite().map(|cs| cs.name())
            }
        }
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.alpn_protocol(),
            CryptoConnection::RustlsClient(conn) => conn.alpn_protocol(),
            CryptoConnection::Tls13Server(conn) => conn.negotiated_alpn(),
            CryptoConnection::Tls13Client(conn) => conn.negotiated_alpn(),
        }
    }

    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.peer_certificates(),
            CryptoConnection::RustlsClient(conn) => conn.peer_certificates(),
            // client certificates are never requested
            CryptoConnection::Tls13Server(_) => None,
            CryptoConnection::Tls13Client(conn) => {
                let certs = conn.peer_certificates();
                (!certs.is_empty()).then_some(certs)
            }
        }
    }

    /// Server name sent (client) or received (server) in the SNI extension.
    pub fn server_name(&self) -> Option<&str> {
        match self {
            CryptoConnection::RustlsServer(conn) => conn.server_name(),
            CryptoConnection::RustlsClient(_) => None,
            CryptoConnection::Tls13Server(conn) => conn.server_name(),
            CryptoConnection::Tls13Client(conn) => Some(conn.server_name()),
        }
    }

    /// Whether the session was resumed. Session resumption is never offered.
    pub fn did_resume(&self) -> bool {
        match self {
            CryptoConnection::RustlsServer(conn) => {
                matches!(conn.handshake_kind(), Some(rustls::HandshakeKind::Resumed))
            }
            CryptoConnection::RustlsClient(conn) => {
                matches!(conn.handshake_kind(), Some(rustls::HandshakeKind::Resumed))
            }
            CryptoConnection::Tls13Server(_) | CryptoConnection::Tls13Client(_) => false,
        }
    }
}

#[inline(always)]
pub fn feed_crypto_connection(connection: &mut CryptoConnection, data: &[u8]) -> io::Result<()> {
    match connection {
        CryptoConnection::RustlsServer(conn) => feed_rustls_server_connection(conn, data),
        CryptoConnection::RustlsClient(conn) => feed_rustls_client_connection(conn, data),
        CryptoConnection::Tls13Server(conn) => feed_tls13_server_connection(conn, data),
        CryptoConnection::Tls13Client(conn) => feed_tls13_client_connection(conn, data),
    }
}
