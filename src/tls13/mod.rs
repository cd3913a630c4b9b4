// Hand-rolled TLS 1.3: fingerprint-controlled client, minimal server, and the
// hello-random hook used by the camouflage layer.

mod common;
mod tls13_aead;
mod tls13_cipher_suite;
mod tls13_client_connection;
mod tls13_hello_auth;
mod tls13_keys;
mod tls13_messages;
mod tls13_profile;
mod tls13_reader_writer;
mod tls13_record_layer;
mod tls13_records;
mod tls13_server_connection;
mod tls13_verify;

pub use common::{
    CONTENT_TYPE_HANDSHAKE, HANDSHAKE_TYPE_CLIENT_HELLO, HANDSHAKE_TYPE_SERVER_HELLO,
    HELLO_RANDOM_LEN, HELLO_RANDOM_OFFSET, MAX_HANDSHAKE_MESSAGE_LEN, MAX_TLS_CIPHERTEXT_LEN,
    MAX_TLS_PLAINTEXT_LEN, TLS_RECORD_HEADER_SIZE, VERSION_TLS_1_0, VERSION_TLS_1_2,
    VERSION_TLS_1_3,
};
pub use tls13_cipher_suite::{CipherSuite, DEFAULT_CIPHER_SUITES, parse_cipher_suites};
pub use tls13_hello_auth::{HelloAuth, HelloAuthenticator};
pub use tls13_messages::{ClientHelloInfo, parse_client_hello};
pub use tls13_profile::ClientHelloProfile;

// Re-exports for crypto_connection module
pub use tls13_client_connection::{
    Tls13ClientConfig, Tls13ClientConnection, feed_tls13_client_connection,
};
pub use tls13_reader_writer::{Tls13Reader, Tls13Writer};
pub use tls13_record_layer::Tls13IoState;
pub use tls13_server_connection::{
    Tls13ServerConfig, Tls13ServerConnection, feed_tls13_server_connection,
};
