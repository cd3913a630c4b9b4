//! jls-tunnel - TLS camouflage transport.
//!
//! Clients and servers that share a password and IV authenticate each other through
//! tokens sealed into the ClientHello and ServerHello random fields of an otherwise
//! ordinary TLS 1.3 handshake. A peer without the secret sees a normal TLS server for
//! the configured cover name, and the client sees a normal handshake to it.
//!
//! # Layout
//!
//! - [`tls_engine`]: the [`tls_engine::TlsEngine`] interface with standard (rustls),
//!   fingerprint (hand-rolled TLS 1.3 client) and camouflage backends
//! - [`jls`]: token sealing and the camouflage client/server handshakes
//! - [`tls13`]: hand-rolled TLS 1.3 used by the fingerprint and camouflage backends
//! - [`fragment`]: splits the ClientHello record into many small records
//! - [`mkcert`]: short-lived self-signed certificates for the cover identity
//! - [`config`] and [`tcp_server`]: the YAML operator surface used by the binary

pub mod address;
pub mod async_stream;
mod buf_reader;
pub mod config;
pub mod crypto;
pub mod direct;
pub mod fragment;
pub mod jls;
pub mod mkcert;
mod option_util;
pub mod rustls_util;
pub mod server_identity;
mod sync_adapter;
pub mod tcp_server;
pub mod tls13;
pub mod tls_engine;
