use std::net::SocketAddr;

use log::{error, info};
use tokio::net::TcpStream;

use crate::address::{Address, NetLocation};
use crate::async_stream::AsyncStream;
use crate::fragment::{FragmentConfig, FragmentedClientHelloStream};

/// Rewrites the destination of every outbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverrideDestination {
    #[default]
    None,
    /// Replace both address and port.
    Location(NetLocation),
    /// Replace the address, keep the requested port.
    Address(Address),
    /// Keep the requested address, replace the port.
    Port(u16),
}

impl OverrideDestination {
    pub fn new(address: Option<Address>, port: Option<u16>) -> Self {
        match (address, port) {
            (Some(address), Some(port)) => Self::Location(NetLocation::new(address, port)),
            (Some(address), None) => Self::Address(address),
            (None, Some(port)) => Self::Port(port),
            (None, None) => Self::None,
        }
    }

    pub fn apply(&self, destination: &NetLocation) -> NetLocation {
        match self {
            Self::None => destination.clone(),
            Self::Location(location) => location.clone(),
            Self::Address(address) => NetLocation::new(address.clone(), destination.port()),
            Self::Port(port) => NetLocation::new(destination.address().clone(), *port),
        }
    }
}

pub async fn resolve_location(location: &NetLocation) -> std::io::Result<SocketAddr> {
    if let Some(addr) = location.to_socket_addr_nonblocking() {
        return Ok(addr);
    }
    let (address, port) = location.components();
    tokio::net::lookup_host((address.to_string(), port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not resolve location: {location}"),
            )
        })
}

/// Resolve and connect with `TCP_NODELAY` set.
pub async fn dial_tcp(location: &NetLocation) -> std::io::Result<TcpStream> {
    let addr = resolve_location(location).await?;
    let stream = TcpStream::connect(addr).await?;
    if let Err(e) = stream.set_nodelay(true) {
        error!("Failed to set TCP no-delay: {e}");
    }
    Ok(stream)
}

#[derive(Debug, Clone, Default)]
pub struct DirectConnector {
    override_destination: OverrideDestination,
    fragment: Option<FragmentConfig>,
}

impl DirectConnector {
    pub fn new(override_destination: OverrideDestination, fragment: Option<FragmentConfig>) -> Self {
        Self {
            override_destination,
            fragment,
        }
    }

    pub fn fragment(&self) -> Option<&FragmentConfig> {
        self.fragment.as_ref()
    }

    pub async fn connect(&self, destination: &NetLocation) -> std::io::Result<Box<dyn AsyncStream>> {
        let destination = self.override_destination.apply(destination);
        info!("outbound connection to {destination}");
        let stream = dial_tcp(&destination).await?;
        Ok(match self.fragment {
            Some(config) => Box::new(FragmentedClientHelloStream::new(stream, config)),
            None => Box::new(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn location(s: &str) -> NetLocation {
        NetLocation::from_str(s, None).unwrap()
    }

    #[test]
    fn test_override_variants() {
        let destination = location("example.com:443");

        assert_eq!(OverrideDestination::new(None, None).apply(&destination), destination);
        assert_eq!(
            OverrideDestination::new(Some(Address::Ipv4(Ipv4Addr::LOCALHOST)), Some(8443))
                .apply(&destination),
            location("127.0.0.1:8443")
        );
        assert_eq!(
            OverrideDestination::new(Some(Address::Hostname("cdn.example".into())), None)
                .apply(&destination),
            location("cdn.example:443")
        );
        assert_eq!(
            OverrideDestination::new(None, Some(8080)).apply(&destination),
            location("example.com:8080")
        );
    }

    #[tokio::test]
    async fn test_connect_with_fragmentation() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = DirectConnector::new(
            OverrideDestination::Port(port),
            Some(FragmentConfig::new("2", "0").unwrap()),
        );
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2 * 7];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = connector.connect(&location("127.0.0.1:1")).await.unwrap();
        assert_eq!(crate::async_stream::chain_depth(stream.as_ref()), 2);
        stream
            .write_all(&[0x16, 0x03, 0x01, 0x00, 0x04, 1, 2, 3, 4])
            .await
            .unwrap();
        stream.flush().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![0x16, 0x03, 0x01, 0x00, 0x02, 1, 2, 0x16, 0x03, 0x01, 0x00, 0x02, 3, 4]
        );
    }
}
