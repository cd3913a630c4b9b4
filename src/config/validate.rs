//! Validation of parsed configs into runtime configs with constructed engines.

use std::sync::Arc;

use super::pem::load_server_identity;
use super::types::{ClientConfig, Config, DirectConfig, ServerConfig, TlsConfig};
use crate::address::{Address, NetLocation};
use crate::direct::{DirectConnector, OverrideDestination};
use crate::fragment::FragmentConfig;
use crate::jls::JlsSecret;
use crate::mkcert::TimeFunc;
use crate::rustls_util::{tls12_cipher_suite_from_name, tls12_cipher_suite_names};
use crate::tls13::{CipherSuite, ClientHelloProfile, DEFAULT_CIPHER_SUITES, parse_cipher_suites};
use crate::tls_engine::{
    ClientEngineConfig, EngineKind, ServerEngineConfig, TlsEngine, build_client_engine,
    build_server_engine,
};

#[derive(Debug)]
pub struct ServerRuntimeConfig {
    pub bind_location: NetLocation,
    pub engine: Arc<dyn TlsEngine>,
    pub target: NetLocation,
}

#[derive(Debug)]
pub struct ClientRuntimeConfig {
    pub bind_location: NetLocation,
    pub server: NetLocation,
    pub engine: Arc<dyn TlsEngine>,
    pub connector: DirectConnector,
}

#[derive(Debug)]
pub enum RuntimeConfig {
    Server(ServerRuntimeConfig),
    Client(ClientRuntimeConfig),
}

impl RuntimeConfig {
    pub fn bind_location(&self) -> &NetLocation {
        match self {
            RuntimeConfig::Server(config) => &config.bind_location,
            RuntimeConfig::Client(config) => &config.bind_location,
        }
    }
}

/// Validates every entry; the first error aborts the whole set.
pub async fn create_runtime_configs(
    configs: Vec<Config>,
    time_fn: &TimeFunc,
) -> std::io::Result<Vec<RuntimeConfig>> {
    let mut runtime_configs = Vec::with_capacity(configs.len());
    for config in configs {
        let runtime_config = match config {
            Config::Server(server) => {
                RuntimeConfig::Server(create_server_config(server, time_fn).await?)
            }
            Config::Client(client) => RuntimeConfig::Client(create_client_config(client)?),
        };
        runtime_configs.push(runtime_config);
    }
    Ok(runtime_configs)
}

fn create_secret(tls: &TlsConfig) -> std::io::Result<Option<Arc<JlsSecret>>> {
    if tls.engine != EngineKind::Camouflage {
        return Ok(None);
    }
    let secret = JlsSecret::new(
        tls.password.clone().unwrap_or_default(),
        tls.iv.clone().unwrap_or_default(),
    )?;
    Ok(Some(Arc::new(secret)))
}

fn create_profile(tls: &TlsConfig) -> std::io::Result<ClientHelloProfile> {
    match tls.fingerprint.as_deref() {
        None => Ok(ClientHelloProfile::default()),
        Some(name) => ClientHelloProfile::from_name(name).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown fingerprint: {name} (valid values: chrome, firefox, minimal)"),
            )
        }),
    }
}

/// Servers also answer TLS 1.2 clients through rustls, so their list may name TLS 1.2 suites.
/// Those only narrow the TLS 1.2 set; TLS 1.3 keeps its defaults unless a TLS 1.3 name is given.
fn parse_server_cipher_suites(
    names: &[String],
) -> std::io::Result<(Vec<CipherSuite>, Vec<rustls::CipherSuite>)> {
    let mut tls13_suites = Vec::new();
    let mut tls12_suites = Vec::new();
    for name in names {
        if let Some(suite) = CipherSuite::from_name(name) {
            if !tls13_suites.contains(&suite) {
                tls13_suites.push(suite);
            }
        } else if let Some(suite) = tls12_cipher_suite_from_name(name) {
            if !tls12_suites.contains(&suite) {
                tls12_suites.push(suite);
            }
        } else {
            let mut valid: Vec<String> = DEFAULT_CIPHER_SUITES
                .iter()
                .map(|suite| suite.name().to_string())
                .collect();
            valid.extend(tls12_cipher_suite_names());
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "unknown cipher_suite: {name} (valid values: {})",
                    valid.join(", ")
                ),
            ));
        }
    }
    if tls13_suites.is_empty() {
        tls13_suites = DEFAULT_CIPHER_SUITES.to_vec();
    }
    Ok((tls13_suites, tls12_suites))
}

async fn create_server_config(
    config: ServerConfig,
    time_fn: &TimeFunc,
) -> std::io::Result<ServerRuntimeConfig> {
    let ServerConfig {
        bind_location,
        tls,
        target,
        fallback,
    } = config;

    let server_name = tls.server_name.clone().unwrap_or_default();
    if tls.engine == EngineKind::Camouflage && server_name.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "fallback website is needed",
        ));
    }

    let secret = create_secret(&tls)?;
    let (cipher_suites, tls12_cipher_suites) =
        parse_server_cipher_suites(&tls.cipher_suites.clone().into_vec())?;
    let identity = Arc::new(load_server_identity(&tls, &server_name, time_fn).await?);

    let engine = build_server_engine(ServerEngineConfig {
        kind: tls.engine,
        server_name,
        alpn_protocols: tls.alpn_protocols.into_vec(),
        cipher_suites,
        tls12_cipher_suites,
        identity,
        secret,
        fallback,
    })?;

    Ok(ServerRuntimeConfig {
        bind_location,
        engine: Arc::from(engine),
        target,
    })
}

fn create_connector(direct: DirectConfig) -> std::io::Result<DirectConnector> {
    let override_address = direct
        .override_address
        .as_deref()
        .map(Address::from)
        .transpose()?;
    let fragment = direct
        .fragment
        .map(|fragment| FragmentConfig::new(&fragment.length, &fragment.interval))
        .transpose()?;
    Ok(DirectConnector::new(
        OverrideDestination::new(override_address, direct.override_port),
        fragment,
    ))
}

fn create_client_config(config: ClientConfig) -> std::io::Result<ClientRuntimeConfig> {
    let ClientConfig {
        bind_location,
        server,
        tls,
        direct,
    } = config;

    // SNI defaults to the server's hostname
    let server_name = match tls.server_name.clone() {
        Some(name) => name,
        None => server
            .address()
            .hostname()
            .map(str::to_string)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("server_name is required when server is an IP address: {server}"),
                )
            })?,
    };

    let engine = build_client_engine(ClientEngineConfig {
        kind: tls.engine,
        server_name,
        alpn_protocols: tls.alpn_protocols.clone().into_vec(),
        cipher_suites: parse_cipher_suites(&tls.cipher_suites.clone().into_vec())?,
        profile: create_profile(&tls)?,
        insecure: tls.insecure,
        secret: create_secret(&tls)?,
    })?;

    Ok(ClientRuntimeConfig {
        bind_location,
        server,
        engine: Arc::from(engine),
        connector: create_connector(direct)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkcert::system_time;

    async fn validate(yaml: &str) -> std::io::Result<Vec<RuntimeConfig>> {
        let configs: Vec<Config> = serde_yaml::from_str(yaml).unwrap();
        create_runtime_configs(configs, &system_time()).await
    }

    #[tokio::test]
    async fn test_valid_server_and_client() {
        let configs = validate(
            r#"
- bind_location: 127.0.0.1:8443
  target: 127.0.0.1:8080
  tls:
    engine: camouflage
    server_name: cover.example
    password: p
    iv: s
    ephemeral_cert: true
- bind_location: 127.0.0.1:1080
  server: proxy.example:443
  tls:
    engine: fingerprint
    fingerprint: firefox
    alpn: h2
  direct:
    override_port: 8443
    fragment:
      length: 1-5
      interval: 10-0
"#,
        )
        .await
        .unwrap();
        assert_eq!(configs.len(), 2);

        let RuntimeConfig::Server(server) = &configs[0] else {
            panic!("expected server");
        };
        assert_eq!(server.engine.server_name(), "cover.example");

        let RuntimeConfig::Client(client) = &configs[1] else {
            panic!("expected client");
        };
        assert_eq!(client.engine.server_name(), "proxy.example");
        assert_eq!(client.engine.next_protos(), ["h2".to_string()]);
        let fragment = client.connector.fragment().unwrap();
        assert_eq!(fragment.interval.min(), 0);
        assert_eq!(fragment.interval.max(), 10);
        assert_eq!(configs[1].bind_location().port(), 1080);
    }

    #[tokio::test]
    async fn test_empty_password() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:1080
  server: proxy.example:443
  tls:
    engine: camouflage
    iv: s
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "empty password");
    }

    #[tokio::test]
    async fn test_empty_iv() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:1080
  server: proxy.example:443
  tls:
    engine: camouflage
    password: p
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "empty iv");
    }

    #[tokio::test]
    async fn test_server_requires_server_name() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:8443
  target: 127.0.0.1:8080
  tls:
    engine: camouflage
    password: p
    iv: s
    ephemeral_cert: true
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "fallback website is needed");
    }

    #[tokio::test]
    async fn test_unknown_cipher_suite() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:1080
  server: proxy.example:443
  tls:
    cipher_suites: [TLS_AES_128_GCM_SHA256, TLS_RSA_WITH_RC4_128_MD5]
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(
            err.to_string()
                .starts_with("unknown cipher_suite: TLS_RSA_WITH_RC4_128_MD5")
        );
    }

    #[tokio::test]
    async fn test_server_accepts_tls12_suite_names() {
        let configs = validate(
            r#"
- bind_location: 127.0.0.1:8443
  target: 127.0.0.1:8080
  tls:
    engine: camouflage
    server_name: cover.example
    password: p
    iv: s
    ephemeral_cert: true
    cipher_suites: [TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256]
"#,
        )
        .await
        .unwrap();
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn test_tls12_names_leave_tls13_defaults() {
        let names = vec![
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
            "TLS_CHACHA20_POLY1305_SHA256".to_string(),
        ];
        let (tls13, tls12) = parse_server_cipher_suites(&names).unwrap();
        assert_eq!(tls13, vec![CipherSuite::CHACHA20_POLY1305_SHA256]);
        assert_eq!(
            tls12,
            vec![rustls::CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]
        );

        let (tls13, _) =
            parse_server_cipher_suites(&["TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string()])
                .unwrap();
        assert_eq!(tls13, DEFAULT_CIPHER_SUITES.to_vec());

        let err = parse_server_cipher_suites(&["TLS_RSA_WITH_RC4_128_MD5".to_string()]).unwrap_err();
        assert!(err.to_string().contains("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"));
    }

    #[tokio::test]
    async fn test_missing_certificate() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:8443
  target: 127.0.0.1:8080
  tls:
    engine: camouflage
    server_name: cover.example
    password: p
    iv: s
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "missing certificate");
    }

    #[tokio::test]
    async fn test_invalid_fragment_length() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:1080
  server: proxy.example:443
  tls: {}
  direct:
    fragment:
      length: ten
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid fragment length: ten");
    }

    #[tokio::test]
    async fn test_fingerprint_engine_has_no_server_role() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:8443
  target: 127.0.0.1:8080
  tls:
    engine: fingerprint
    server_name: cover.example
    ephemeral_cert: true
"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_ip_server_needs_server_name() {
        let err = validate(
            r#"
- bind_location: 127.0.0.1:1080
  server: 10.0.0.1:443
  tls: {}
"#,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("server_name is required"));
    }
}
