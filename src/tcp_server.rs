use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::config::{ClientRuntimeConfig, RuntimeConfig, ServerRuntimeConfig};
use crate::direct::{DirectConnector, dial_tcp, resolve_location};
use crate::jls::is_authentication_failure;
use crate::tls_engine::TlsEngine;

const SERVER_SETUP_TIMEOUT: Duration = Duration::from_secs(60);
const CLIENT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn start_tcp_server(config: RuntimeConfig) -> std::io::Result<JoinHandle<()>> {
    let bind_address = resolve_location(config.bind_location()).await?;
    let listener = TcpListener::bind(bind_address).await.map_err(|e| {
        std::io::Error::new(e.kind(), format!("failed to bind {bind_address}: {e}"))
    })?;
    info!("Listening on {bind_address}");
    Ok(tokio::spawn(run_tcp_server(listener, config)))
}

async fn run_tcp_server(listener: TcpListener, config: RuntimeConfig) {
    let config = Arc::new(config);
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("Accept failed: {e:?}");
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            error!("Failed to set TCP no-delay: {e}");
        }

        let config = config.clone();
        tokio::spawn(async move {
            let result = match config.as_ref() {
                RuntimeConfig::Server(server_config) => {
                    process_server_stream(stream, addr, server_config).await
                }
                RuntimeConfig::Client(client_config) => {
                    process_client_stream(stream, addr, client_config).await
                }
            };
            match result {
                Ok(()) => debug!("{}:{} finished successfully", addr.ip(), addr.port()),
                Err(e) => error!("{}:{} finished with error: {}", addr.ip(), addr.port(), e),
            }
        });
    }
}

async fn relay(
    mut local: Box<dyn AsyncStream>,
    mut remote: Box<dyn AsyncStream>,
) -> std::io::Result<()> {
    let copy_result = tokio::io::copy_bidirectional(&mut local, &mut remote).await;
    let (_, _) = futures::join!(local.shutdown(), remote.shutdown());
    copy_result.map(|_| ())
}

async fn process_server_stream(
    stream: TcpStream,
    addr: SocketAddr,
    config: &ServerRuntimeConfig,
) -> std::io::Result<()> {
    let setup = timeout(SERVER_SETUP_TIMEOUT, config.engine.server(Box::new(stream)));
    let server_stream = match setup.await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) if is_authentication_failure(&e) => {
            // the engine owns the socket now and is serving the cover site
            debug!("{}:{} handed to cover session", addr.ip(), addr.port());
            return Ok(());
        }
        Ok(Err(e)) => {
            return Err(std::io::Error::new(
                e.kind(),
                format!("failed to setup server stream: {e}"),
            ));
        }
        Err(elapsed) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("server setup timed out: {elapsed}"),
            ));
        }
    };

    let mut server_stream: Box<dyn AsyncStream> = Box::new(server_stream);
    let target_stream = match timeout(CLIENT_SETUP_TIMEOUT, dial_tcp(&config.target)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            let _ = server_stream.shutdown().await;
            return Err(std::io::Error::new(
                e.kind(),
                format!("failed to connect to target {}: {e}", config.target),
            ));
        }
        Err(elapsed) => {
            let _ = server_stream.shutdown().await;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("target connect timed out: {elapsed}"),
            ));
        }
    };

    relay(server_stream, Box::new(target_stream)).await
}

async fn connect_client_stream(
    connector: &DirectConnector,
    engine: &dyn TlsEngine,
    server: &NetLocation,
) -> std::io::Result<Box<dyn AsyncStream>> {
    let stream = connector.connect(server).await?;
    let connection = engine.client(stream).await?;
    Ok(Box::new(connection))
}

async fn process_client_stream(
    stream: TcpStream,
    addr: SocketAddr,
    config: &ClientRuntimeConfig,
) -> std::io::Result<()> {
    let mut local_stream: Box<dyn AsyncStream> = Box::new(stream);

    let setup = timeout(
        CLIENT_SETUP_TIMEOUT,
        connect_client_stream(&config.connector, config.engine.as_ref(), &config.server),
    );
    let remote_stream = match setup.await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) if is_authentication_failure(&e) => {
            info!(
                "{} failed camouflage authentication, closing {}:{}",
                config.server,
                addr.ip(),
                addr.port()
            );
            let _ = local_stream.shutdown().await;
            return Ok(());
        }
        Ok(Err(e)) => {
            let _ = local_stream.shutdown().await;
            return Err(std::io::Error::new(
                e.kind(),
                format!("failed to setup client stream: {e}"),
            ));
        }
        Err(elapsed) => {
            let _ = local_stream.shutdown().await;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("client setup timed out: {elapsed}"),
            ));
        }
    };

    relay(local_stream, remote_stream).await
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::direct::OverrideDestination;
    use crate::jls::JlsSecret;
    use crate::mkcert::{generate_certificate, system_time};
    use crate::server_identity::ServerIdentity;
    use crate::tls13::ClientHelloProfile;
    use crate::tls_engine::{
        ClientEngineConfig, EngineKind, ServerEngineConfig, build_client_engine,
        build_server_engine,
    };

    fn location(addr: SocketAddr) -> NetLocation {
        NetLocation::from_ip_addr(addr.ip(), addr.port())
    }

    async fn spawn_echo_target() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        addr
    }

    async fn spawn_runtime(config: RuntimeConfig) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_tcp_server(listener, config));
        addr
    }

    async fn spawn_camouflage_server(password: &str, target: SocketAddr) -> SocketAddr {
        let cert = generate_certificate(&system_time(), "cover.example").unwrap();
        let engine = build_server_engine(ServerEngineConfig {
            kind: EngineKind::Camouflage,
            server_name: "cover.example".to_string(),
            alpn_protocols: Vec::new(),
            cipher_suites: Vec::new(),
            tls12_cipher_suites: Vec::new(),
            identity: Arc::new(
                ServerIdentity::fixed(cert.cert_chain(), cert.private_key_der()).unwrap(),
            ),
            secret: Some(Arc::new(JlsSecret::new(password, "iv").unwrap())),
            fallback: None,
        })
        .unwrap();
        spawn_runtime(RuntimeConfig::Server(ServerRuntimeConfig {
            bind_location: NetLocation::from_ip_addr([127, 0, 0, 1].into(), 0),
            engine: Arc::from(engine),
            target: location(target),
        }))
        .await
    }

    async fn spawn_camouflage_client(password: &str, server: SocketAddr) -> SocketAddr {
        let engine = build_client_engine(ClientEngineConfig {
            kind: EngineKind::Camouflage,
            server_name: "cover.example".to_string(),
            alpn_protocols: Vec::new(),
            cipher_suites: Vec::new(),
            profile: ClientHelloProfile::Chrome,
            insecure: false,
            secret: Some(Arc::new(JlsSecret::new(password, "iv").unwrap())),
        })
        .unwrap();
        spawn_runtime(RuntimeConfig::Client(ClientRuntimeConfig {
            bind_location: NetLocation::from_ip_addr([127, 0, 0, 1].into(), 0),
            server: location(server),
            engine: Arc::from(engine),
            connector: DirectConnector::new(
                OverrideDestination::None,
                Some(crate::fragment::FragmentConfig::new("3-17", "0").unwrap()),
            ),
        }))
        .await
    }

    #[tokio::test]
    async fn test_client_to_server_relay() {
        let target = spawn_echo_target().await;
        let server = spawn_camouflage_server("p", target).await;
        let client = spawn_camouflage_client("p", server).await;

        let mut local = TcpStream::connect(client).await.unwrap();
        local.write_all(b"through the tunnel").await.unwrap();
        let mut buf = [0u8; 18];
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the tunnel");
    }

    #[tokio::test]
    async fn test_auth_failure_closes_local_connection() {
        let target = spawn_echo_target().await;
        let server = spawn_camouflage_server("p2", target).await;
        let client = spawn_camouflage_client("p1", server).await;

        let mut local = TcpStream::connect(client).await.unwrap();
        local.write_all(b"hello").await.unwrap();
        let mut buf = Vec::new();
        let read = timeout(Duration::from_secs(10), local.read_to_end(&mut buf))
            .await
            .unwrap();
        // either a clean close or a reset, never echoed data
        if read.is_ok() {
            assert!(buf.is_empty());
        }
    }

    #[tokio::test]
    async fn test_start_tcp_server_reports_bind_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap();
        let engine = build_client_engine(ClientEngineConfig {
            kind: EngineKind::Standard,
            server_name: "cover.example".to_string(),
            alpn_protocols: Vec::new(),
            cipher_suites: Vec::new(),
            profile: ClientHelloProfile::Chrome,
            insecure: true,
            secret: None,
        })
        .unwrap();
        let result = start_tcp_server(RuntimeConfig::Client(ClientRuntimeConfig {
            bind_location: location(taken),
            server: location(taken),
            engine: Arc::from(engine),
            connector: DirectConnector::default(),
        }))
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("failed to bind"));
    }
}
