// Unified cryptographic connection abstraction
//
// This module provides a common interface for rustls and the hand-rolled TLS 1.3
// connections, allowing them to be used interchangeably throughout the codebase.

mod crypto_connection;
mod crypto_handshake;
mod crypto_reader_writer;
mod crypto_tls_stream;

pub use crypto_connection::{CryptoConnection, feed_crypto_connection};
pub use crypto_handshake::{perform_crypto_handshake, perform_crypto_handshake_until};
pub use crypto_tls_stream::CryptoTlsStream;
// CryptoReader, CryptoWriter, and CryptoIoState are used internally within this module
