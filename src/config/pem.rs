//! Certificate and key loading: inline PEM, PEM files, or an ephemeral certificate.

use log::{debug, info};

use super::types::TlsConfig;
use crate::mkcert::TimeFunc;
use crate::rustls_util::{load_certs_pem, load_private_key_pem};
use crate::server_identity::ServerIdentity;

fn is_inline_pem(value: &str) -> bool {
    value.trim_start().starts_with("-----BEGIN")
}

async fn read_pem(kind: &str, path: &str) -> std::io::Result<String> {
    debug!("Reading PEM file: {path}");
    tokio::fs::read_to_string(path).await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("read {kind} {path}: {e}"),
        )
    })
}

/// Resolves `inline` (PEM text or a path) or `path` into PEM text.
async fn resolve_pem(
    kind: &str,
    inline: Option<&str>,
    path: Option<&str>,
) -> std::io::Result<Option<String>> {
    match (inline, path) {
        (Some(value), _) if is_inline_pem(value) => Ok(Some(value.to_string())),
        (Some(path), _) | (None, Some(path)) => read_pem(kind, path).await.map(Some),
        (None, None) => Ok(None),
    }
}

/// Loads the identity a TLS server presents.
///
/// Configured material always wins; `ephemeral_cert` only fills in when nothing is configured.
pub async fn load_server_identity(
    tls: &TlsConfig,
    server_name: &str,
    time_fn: &TimeFunc,
) -> std::io::Result<ServerIdentity> {
    let cert_pem = resolve_pem("certificate", tls.cert.as_deref(), tls.cert_path.as_deref()).await?;
    let key_pem = resolve_pem("key", tls.key.as_deref(), tls.key_path.as_deref()).await?;

    match (cert_pem, key_pem) {
        (Some(cert_pem), Some(key_pem)) => ServerIdentity::fixed(
            load_certs_pem(cert_pem.as_bytes())?,
            load_private_key_pem(key_pem.as_bytes())?,
        ),
        (None, None) if tls.ephemeral_cert => {
            if server_name.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "fallback website is needed",
                ));
            }
            let identity = ServerIdentity::ephemeral(server_name.to_string(), time_fn.clone())?;
            info!("Generated ephemeral certificate for {server_name}");
            Ok(identity)
        }
        (None, _) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "missing certificate",
        )),
        (Some(_), None) => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "missing key",
        )),
    }
}
