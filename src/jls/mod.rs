// Camouflage handshake: a token sealed into the hello random authenticates each side, and a
// failed check falls back to an ordinary TLS session.

mod jls_client;
mod jls_client_hello;
mod jls_error;
mod jls_secret;
mod jls_server;

pub use jls_client::{JlsClientConfig, client_handshake};
pub use jls_client_hello::{ParsedClientHello, read_client_hello};
pub use jls_error::{CamouflageAuthError, Role, authentication_failure, is_authentication_failure};
pub use jls_secret::{JlsSecret, auth_data};
pub use jls_server::{JlsServerConfig, server_handshake};
