//! Configuration module.
//!
//! This module provides:
//! - [`types`]: YAML configuration types for server and client entries
//! - [`pem`]: certificate and key loading, including ephemeral certificates
//! - [`validate`]: validation into runtime configs with constructed TLS engines
//!
//! The main entry points are:
//! - [`load_configs`]: Load config files from disk
//! - [`create_runtime_configs`]: Validate and create final runtime configs

mod pem;
mod types;
mod validate;

pub use types::*;
pub use validate::{ClientRuntimeConfig, RuntimeConfig, ServerRuntimeConfig, create_runtime_configs};

/// Loads configuration files from the provided paths.
///
/// Reads each file, parses it as YAML, and returns the combined list of configs.
pub async fn load_configs(args: &[String]) -> std::io::Result<Vec<Config>> {
    let mut all_configs = vec![];
    for config_filename in args {
        let config_bytes = match tokio::fs::read(config_filename).await {
            Ok(b) => b,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not read config file {config_filename}: {e}"),
                ));
            }
        };

        let config_str = match String::from_utf8(config_bytes) {
            Ok(s) => s,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as UTF8: {e}"),
                ));
            }
        };

        let mut configs = match serde_yaml::from_str::<Vec<Config>>(&config_str) {
            Ok(c) => c,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as config YAML: {e}"),
                ));
            }
        };
        all_configs.append(&mut configs)
    }

    Ok(all_configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_configs_concatenates_files() {
        let dir = std::env::temp_dir();
        let first = dir.join(format!("jls-tunnel-{}-a.yaml", std::process::id()));
        let second = dir.join(format!("jls-tunnel-{}-b.yaml", std::process::id()));
        let entry = "- bind_location: 127.0.0.1:1080\n  server: proxy.example:443\n  tls: {}\n";
        tokio::fs::write(&first, entry).await.unwrap();
        tokio::fs::write(&second, entry).await.unwrap();

        let paths = vec![
            first.to_string_lossy().into_owned(),
            second.to_string_lossy().into_owned(),
        ];
        let result = load_configs(&paths).await;

        let _ = tokio::fs::remove_file(&first).await;
        let _ = tokio::fs::remove_file(&second).await;
        assert_eq!(result.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_configs_reports_file() {
        let err = load_configs(&["/nonexistent/config.yaml".to_string()])
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Could not read config file /nonexistent/config.yaml")
        );
    }
}
