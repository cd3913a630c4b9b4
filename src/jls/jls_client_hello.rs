use tokio::io::{AsyncRead, AsyncReadExt};

use crate::tls13::{
    CONTENT_TYPE_HANDSHAKE, ClientHelloInfo, HANDSHAKE_TYPE_CLIENT_HELLO,
    MAX_HANDSHAKE_MESSAGE_LEN, MAX_TLS_PLAINTEXT_LEN, TLS_RECORD_HEADER_SIZE, parse_client_hello,
};

/// A ClientHello read off the wire.
#[derive(Debug, Clone)]
pub struct ParsedClientHello {
    /// The reassembled handshake message, including its 4-byte header.
    pub message: Vec<u8>,
    /// The records exactly as received, headers included.
    pub records: Vec<Vec<u8>>,
    /// Record-layer version of the first record.
    pub record_version: u16,
    pub info: ClientHelloInfo,
}

impl ParsedClientHello {
    pub fn requested_server_name(&self) -> Option<&str> {
        self.info.server_name.as_deref()
    }

    pub fn raw_len(&self) -> usize {
        self.records.iter().map(Vec::len).sum()
    }
}

/// Read handshake records until they hold one complete ClientHello.
///
/// Clients may split the hello across any number of records (down to a single byte each); nothing
/// beyond the final record is consumed from `stream`.
pub async fn read_client_hello<S>(stream: &mut S) -> std::io::Result<ParsedClientHello>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut message: Vec<u8> = Vec::new();
    let mut records: Vec<Vec<u8>> = Vec::new();
    let mut record_version = 0u16;
    let mut expected_len: Option<usize> = None;

    loop {
        let mut header = [0u8; TLS_RECORD_HEADER_SIZE];
        stream.read_exact(&mut header).await?;

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected client handshake, got content type {}", header[0]),
            ));
        }
        let version = u16::from_be_bytes([header[1], header[2]]);
        if records.is_empty() {
            record_version = version;
        }
        let payload_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if payload_len == 0 || payload_len > MAX_TLS_PLAINTEXT_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid ClientHello record length: {}", payload_len),
            ));
        }

        let mut record = Vec::with_capacity(TLS_RECORD_HEADER_SIZE + payload_len);
        record.extend_from_slice(&header);
        record.resize(TLS_RECORD_HEADER_SIZE + payload_len, 0);
        stream
            .read_exact(&mut record[TLS_RECORD_HEADER_SIZE..])
            .await?;
        message.extend_from_slice(&record[TLS_RECORD_HEADER_SIZE..]);
        records.push(record);

        if expected_len.is_none() && message.len() >= 4 {
            if message[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("expected ClientHello, got handshake type {}", message[0]),
                ));
            }
            let body_len =
                ((message[1] as usize) << 16) | ((message[2] as usize) << 8) | message[3] as usize;
            if body_len + 4 > MAX_HANDSHAKE_MESSAGE_LEN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("ClientHello too large: {} bytes", body_len),
                ));
            }
            expected_len = Some(body_len + 4);
        }

        if let Some(total) = expected_len {
            if message.len() == total {
                break;
            }
            if message.len() > total {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unexpected handshake data after ClientHello",
                ));
            }
        }
    }

    let info = parse_client_hello(&message)?;

    log::debug!(
        "read ClientHello: {} bytes in {} records, server name {:?}",
        message.len(),
        records.len(),
        info.server_name
    );

    Ok(ParsedClientHello {
        message,
        records,
        record_version,
        info,
    })
}
