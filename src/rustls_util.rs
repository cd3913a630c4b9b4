use std::io::Cursor;
use std::sync::Arc;
use std::sync::OnceLock;

use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use crate::server_identity::ServerIdentity;
use crate::tls13::CipherSuite;

/// rustls client config for the standard engine.
///
/// `cipher_suites` restricts the TLS 1.3 suites (empty = provider defaults); TLS 1.2
/// suites are left untouched.
pub fn create_client_config(
    verify_webpki: bool,
    alpn_protocols: &[String],
    cipher_suites: &[CipherSuite],
) -> std::io::Result<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider_for(cipher_suites, &[])?)
        .with_safe_default_protocol_versions()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let builder = if verify_webpki {
        let webpki_verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(
            get_root_cert_store(),
            get_crypto_provider(),
        )
        .build()
        .map_err(|e| std::io::Error::other(format!("failed to build verifier: {}", e)))?;
        builder.with_webpki_verifier(webpki_verifier)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(get_disabled_verifier())
    };

    let mut config = builder.with_no_client_auth();
    config.alpn_protocols = alpn_protocols
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
    config.enable_sni = true;
    Ok(Arc::new(config))
}

pub fn create_server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    alpn_protocols: &[String],
    cipher_suites: &[CipherSuite],
) -> std::io::Result<Arc<rustls::ServerConfig>> {
    let identity = ServerIdentity::fixed(cert_chain, private_key)?;
    create_identity_server_config(Arc::new(identity), alpn_protocols, cipher_suites, &[])
}

/// rustls server config that asks `identity` for the certificate on every handshake.
///
/// `tls12_cipher_suites` restricts the TLS 1.2 suites the same way `cipher_suites` restricts
/// the TLS 1.3 ones.
pub fn create_identity_server_config(
    identity: Arc<ServerIdentity>,
    alpn_protocols: &[String],
    cipher_suites: &[CipherSuite],
    tls12_cipher_suites: &[rustls::CipherSuite],
) -> std::io::Result<Arc<rustls::ServerConfig>> {
    let provider = crypto_provider_for(cipher_suites, tls12_cipher_suites)?;
    let builder = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let mut config = builder.with_no_client_auth().with_cert_resolver(identity);

    config.alpn_protocols = alpn_protocols
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
    config.max_fragment_size = None;
    config.ignore_client_order = true;

    Ok(Arc::new(config))
}

/// WebPKI verifier over the bundled root store, for the hand-rolled client.
pub fn webpki_server_verifier() -> std::io::Result<Arc<dyn ServerCertVerifier>> {
    let verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(
        get_root_cert_store(),
        get_crypto_provider(),
    )
    .build()
    .map_err(|e| std::io::Error::other(format!("failed to build verifier: {}", e)))?;
    Ok(verifier)
}

/// Parse every certificate in a PEM bundle.
pub fn load_certs_pem(cert_bytes: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(cert_bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid certificate PEM: {}", e),
            )
        })?;
    if certs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "missing certificate",
        ));
    }
    Ok(certs)
}

pub fn load_private_key_pem(key_bytes: &[u8]) -> std::io::Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(key_bytes).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid private key PEM: {}", e),
        )
    })
}

/// Pair a chain with its key for signing CertificateVerify.
pub fn load_certified_key(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
) -> std::io::Result<Arc<CertifiedKey>> {
    if cert_chain.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "missing certificate",
        ));
    }
    let key = CertifiedKey::from_der(cert_chain, private_key, &get_crypto_provider()).map_err(
        |e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad certificate/key: {}", e),
            )
        },
    )?;
    Ok(Arc::new(key))
}

#[derive(Debug)]
pub struct DisabledVerifier {
    supported_algs: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl rustls::client::danger::ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    static INSTANCE: OnceLock<Arc<rustls::crypto::CryptoProvider>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .clone()
}

fn crypto_provider_for(
    cipher_suites: &[CipherSuite],
    tls12_cipher_suites: &[rustls::CipherSuite],
) -> std::io::Result<Arc<rustls::crypto::CryptoProvider>> {
    if cipher_suites.is_empty() && tls12_cipher_suites.is_empty() {
        return Ok(get_crypto_provider());
    }
    let allowed: Vec<u16> = cipher_suites.iter().map(|cs| cs.id()).collect();
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    provider.cipher_suites.retain(|suite| match suite {
        rustls::SupportedCipherSuite::Tls13(_) => {
            allowed.is_empty() || allowed.contains(&u16::from(suite.suite()))
        }
        _ => tls12_cipher_suites.is_empty() || tls12_cipher_suites.contains(&suite.suite()),
    });
    if !provider
        .cipher_suites
        .iter()
        .any(|suite| matches!(suite, rustls::SupportedCipherSuite::Tls13(_)))
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no supported TLS 1.3 cipher suite configured",
        ));
    }
    Ok(Arc::new(provider))
}

fn provider_tls12_suites() -> impl Iterator<Item = rustls::CipherSuite> {
    rustls::crypto::aws_lc_rs::ALL_CIPHER_SUITES
        .iter()
        .filter(|suite| !matches!(suite, rustls::SupportedCipherSuite::Tls13(_)))
        .map(|suite| suite.suite())
}

/// Look up a TLS 1.2 suite the bundled provider implements by its IANA name.
pub fn tls12_cipher_suite_from_name(name: &str) -> Option<rustls::CipherSuite> {
    // rustls renders known suites by their IANA name
    provider_tls12_suites().find(|suite| format!("{suite:?}").eq_ignore_ascii_case(name))
}

pub fn tls12_cipher_suite_names() -> Vec<String> {
    provider_tls12_suites().map(|suite| format!("{suite:?}")).collect()
}

fn get_supported_algorithms() -> rustls::crypto::WebPkiSupportedAlgorithms {
    get_crypto_provider().signature_verification_algorithms
}

fn get_disabled_verifier() -> Arc<DisabledVerifier> {
    static INSTANCE: OnceLock<Arc<DisabledVerifier>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            Arc::new(DisabledVerifier {
                supported_algs: get_supported_algorithms(),
            })
        })
        .clone()
}

fn get_root_cert_store() -> Arc<rustls::RootCertStore> {
    static INSTANCE: OnceLock<Arc<rustls::RootCertStore>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let root_store = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            Arc::new(root_store)
        })
        .clone()
}

#[inline]
pub fn feed_rustls_server_connection(
    connection: &mut rustls::ServerConnection,
    data: &[u8],
) -> std::io::Result<()> {
    let mut cursor = Cursor::new(data);
    let mut i = 0;
    while i < data.len() {
        let n = connection.read_tls(&mut cursor).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to feed rustls server connection: {e}"),
            )
        })?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "rustls server connection did not consume all bytes: fed {}/{} bytes",
                    i,
                    data.len()
                ),
            ));
        }
        i += n;
    }
    Ok(())
}

#[inline]
pub fn feed_rustls_client_connection(
    connection: &mut rustls::ClientConnection,
    data: &[u8],
) -> std::io::Result<()> {
    let mut cursor = Cursor::new(data);
    let mut i = 0;
    while i < data.len() {
        let n = connection.read_tls(&mut cursor).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to feed rustls client connection: {e}"),
            )
        })?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "rustls client connection did not consume all bytes: fed {}/{} bytes",
                    i,
                    data.len()
                ),
            ));
        }
        i += n;
    }
    Ok(())
}
