//! YAML configuration types.
//!
//! A config file is a list of entries, each either a server or a client:
//!
//! ```yaml
//! - bind_location: 0.0.0.0:443
//!   target: 127.0.0.1:8080
//!   fallback: www.example.com:443
//!   tls:
//!     engine: camouflage
//!     server_name: www.example.com
//!     password: secret
//!     iv: salt
//!     ephemeral_cert: true
//!
//! - bind_location: 127.0.0.1:1080
//!   server: proxy.example.com:443
//!   tls:
//!     engine: camouflage
//!     server_name: www.example.com
//!     password: secret
//!     iv: salt
//!   direct:
//!     fragment:
//!       length: 10-40
//!       interval: 5-15
//! ```

use serde::Deserialize;

use crate::address::NetLocation;
use crate::option_util::NoneOrSome;
use crate::tls_engine::EngineKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Config {
    Server(ServerConfig),
    Client(ClientConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_location: NetLocation,
    pub tls: TlsConfig,
    /// Where authenticated sessions are forwarded.
    pub target: NetLocation,
    /// Cover site that unauthenticated sessions are relayed to.
    #[serde(default)]
    pub fallback: Option<NetLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub bind_location: NetLocation,
    pub server: NetLocation,
    pub tls: TlsConfig,
    #[serde(default)]
    pub direct: DirectConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(alias = "sni_hostname", default)]
    pub server_name: Option<String>,
    #[serde(alias = "alpn", alias = "alpn_protocol", default)]
    pub alpn_protocols: NoneOrSome<String>,
    #[serde(alias = "cipher_suite", default)]
    pub cipher_suites: NoneOrSome<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(alias = "secondary_secret", default)]
    pub iv: Option<String>,

    /// Inline PEM, or a path to a PEM file.
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    /// Generate a short-lived self-signed certificate for `server_name` when no
    /// certificate is configured.
    #[serde(default)]
    pub ephemeral_cert: bool,

    /// ClientHello profile: chrome, firefox or minimal.
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConfig {
    #[serde(default)]
    pub fragment: Option<FragmentOptions>,
    #[serde(default)]
    pub override_address: Option<String>,
    #[serde(default)]
    pub override_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FragmentOptions {
    /// Bytes per record, `"a-b"` or `"a"`.
    pub length: String,
    /// Milliseconds between records, `"a-b"` or `"a"`.
    #[serde(default = "default_fragment_interval")]
    pub interval: String,
}

fn default_fragment_interval() -> String {
    "0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_and_client_entries() {
        let yaml = r#"
- bind_location: 0.0.0.0:443
  target: 127.0.0.1:8080
  fallback: www.example.com:443
  tls:
    engine: camouflage
    server_name: www.example.com
    password: p
    iv: s
    ephemeral_cert: true
    alpn: [h2, http/1.1]

- bind_location: 127.0.0.1:1080
  server: proxy.example.com:443
  tls:
    engine: camouflage
    server_name: www.example.com
    password: p
    secondary_secret: s
    cipher_suite: TLS_AES_128_GCM_SHA256
  direct:
    fragment:
      length: 10-40
"#;
        let configs: Vec<Config> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(configs.len(), 2);

        let Config::Server(server) = &configs[0] else {
            panic!("expected server entry");
        };
        assert_eq!(server.tls.engine, EngineKind::Camouflage);
        assert!(server.tls.ephemeral_cert);
        assert_eq!(server.tls.alpn_protocols.len(), 2);
        assert_eq!(server.fallback.as_ref().unwrap().port(), 443);

        let Config::Client(client) = &configs[1] else {
            panic!("expected client entry");
        };
        assert_eq!(client.tls.iv.as_deref(), Some("s"));
        assert_eq!(
            client.tls.cipher_suites.clone().into_vec(),
            vec!["TLS_AES_128_GCM_SHA256".to_string()]
        );
        let fragment = client.direct.fragment.as_ref().unwrap();
        assert_eq!(fragment.length, "10-40");
        assert_eq!(fragment.interval, "0");
    }

    #[test]
    fn test_default_engine_is_standard() {
        let yaml = r#"
- bind_location: 127.0.0.1:1080
  server: 10.0.0.1:443
  tls: {}
"#;
        let configs: Vec<Config> = serde_yaml::from_str(yaml).unwrap();
        let Config::Client(client) = &configs[0] else {
            panic!("expected client entry");
        };
        assert_eq!(client.tls.engine, EngineKind::Standard);
        assert!(client.tls.alpn_protocols.is_unspecified());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = r#"
- bind_location: 127.0.0.1:1080
  server: 10.0.0.1:443
  tls:
    engine: camouflage
    passwrd: typo
"#;
        assert!(serde_yaml::from_str::<Vec<Config>>(yaml).is_err());
    }

    #[test]
    fn test_unknown_engine_is_rejected() {
        let yaml = r#"
- bind_location: 127.0.0.1:1080
  server: 10.0.0.1:443
  tls:
    engine: quantum
"#;
        assert!(serde_yaml::from_str::<Vec<Config>>(yaml).is_err());
    }
}
