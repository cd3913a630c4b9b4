// TLS wire constants and small helpers shared by the client and server connections.

use std::io::{self, Error, ErrorKind};

// TLS ContentType values
pub const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 0x14;
pub const CONTENT_TYPE_ALERT: u8 = 0x15;
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
pub const CONTENT_TYPE_APPLICATION_DATA: u8 = 0x17;

// TLS alert levels and descriptions
pub const ALERT_LEVEL_WARNING: u8 = 0x01;
pub const ALERT_DESC_CLOSE_NOTIFY: u8 = 0x00;

// Record layer versions. TLS 1.3 records carry 0x0303; the very first ClientHello
// record traditionally carries 0x0301.
pub const VERSION_TLS_1_0: u16 = 0x0301;
pub const VERSION_TLS_1_2: u16 = 0x0303;
pub const VERSION_TLS_1_3: u16 = 0x0304;

// TLS handshake message types
pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 1;
pub const HANDSHAKE_TYPE_SERVER_HELLO: u8 = 2;
pub const HANDSHAKE_TYPE_NEW_SESSION_TICKET: u8 = 4;
pub const HANDSHAKE_TYPE_ENCRYPTED_EXTENSIONS: u8 = 8;
pub const HANDSHAKE_TYPE_CERTIFICATE: u8 = 11;
pub const HANDSHAKE_TYPE_CERTIFICATE_VERIFY: u8 = 15;
pub const HANDSHAKE_TYPE_FINISHED: u8 = 20;
pub const HANDSHAKE_TYPE_KEY_UPDATE: u8 = 24;

// Extension types
pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_STATUS_REQUEST: u16 = 5;
pub const EXT_SUPPORTED_GROUPS: u16 = 10;
pub const EXT_EC_POINT_FORMATS: u16 = 11;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
pub const EXT_ALPN: u16 = 16;
pub const EXT_SIGNED_CERTIFICATE_TIMESTAMP: u16 = 18;
pub const EXT_PADDING: u16 = 21;
pub const EXT_EXTENDED_MASTER_SECRET: u16 = 23;
pub const EXT_SESSION_TICKET: u16 = 35;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 45;
pub const EXT_KEY_SHARE: u16 = 51;
pub const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

pub const GROUP_X25519: u16 = 0x001d;
pub const GROUP_SECP256R1: u16 = 0x0017;
pub const GROUP_SECP384R1: u16 = 0x0018;
pub const GROUP_SECP521R1: u16 = 0x0019;
pub const GROUP_FFDHE2048: u16 = 0x0100;
pub const GROUP_FFDHE3072: u16 = 0x0101;

/// Random value of a HelloRetryRequest (RFC 8446 Section 4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

/// Offset of the 32-byte random inside a ClientHello or ServerHello handshake message:
/// type (1) + length (3) + legacy_version (2).
pub const HELLO_RANDOM_OFFSET: usize = 6;
pub const HELLO_RANDOM_LEN: usize = 32;

// TLS 1.3 record size limits per RFC 8446
//
// The record header's length field covers the encrypted payload. TLS 1.3 allows
// 2^14 bytes of plaintext plus 256 bytes of expansion.

/// Maximum TLS 1.3 ciphertext payload size (16,640 bytes)
pub const MAX_TLS_CIPHERTEXT_LEN: usize = 16384 + 256;

/// Maximum plaintext payload size for a single TLS 1.3 record
pub const MAX_TLS_PLAINTEXT_LEN: usize = 16384;

/// TLS record header size (ContentType + ProtocolVersion + Length)
pub const TLS_RECORD_HEADER_SIZE: usize = 5;

/// Maximum TLS record size (ciphertext + header)
pub const TLS_MAX_RECORD_SIZE: usize = MAX_TLS_CIPHERTEXT_LEN + TLS_RECORD_HEADER_SIZE;

/// Maximum size of a single handshake message we are willing to buffer.
pub const MAX_HANDSHAKE_MESSAGE_LEN: usize = 64 * 1024;

/// Strip TLS 1.3 content type trailer and padding from decrypted plaintext.
///
/// TLS 1.3 format: content || type_byte || padding_zeros
/// Returns the actual content type and truncates plaintext to the content.
pub fn strip_content_type_with_padding(plaintext: &mut Vec<u8>) -> io::Result<u8> {
    // Remove trailing zeros (padding) per RFC 8446 Section 5.4
    while plaintext.last() == Some(&0) {
        plaintext.pop();
    }

    let content_type = plaintext
        .pop()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Plaintext is all zeros"))?;

    if content_type != CONTENT_TYPE_HANDSHAKE
        && content_type != CONTENT_TYPE_APPLICATION_DATA
        && content_type != CONTENT_TYPE_ALERT
    {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid content type: 0x{:02x}", content_type),
        ));
    }

    Ok(content_type)
}

/// Build a 5-byte TLS record header.
#[inline]
pub fn record_header(content_type: u8, version: u16, length: usize) -> [u8; TLS_RECORD_HEADER_SIZE] {
    let version = version.to_be_bytes();
    [
        content_type,
        version[0],
        version[1],
        (length >> 8) as u8,
        (length & 0xff) as u8,
    ]
}

/// Wrap a handshake body in its 4-byte header (type + 24-bit length).
pub fn handshake_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + body.len());
    message.push(msg_type);
    put_u24(&mut message, body.len());
    message.extend_from_slice(body);
    message
}

/// Split a plaintext handshake flight into handshake records of at most 2^14 bytes.
pub fn plaintext_handshake_records(version: u16, data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks(MAX_TLS_PLAINTEXT_LEN) {
        out.extend_from_slice(&record_header(CONTENT_TYPE_HANDSHAKE, version, chunk.len()));
        out.extend_from_slice(chunk);
    }
}

/// Pop one complete handshake message from the front of `buf`, if available.
pub fn take_handshake_message(buf: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_HANDSHAKE_MESSAGE_LEN {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("handshake message too large: {} bytes", len),
        ));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let rest = buf.split_off(4 + len);
    let message = std::mem::replace(buf, rest);
    Ok(Some(message))
}

#[inline]
pub fn put_u16(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&(value as u16).to_be_bytes());
}

#[inline]
pub fn put_u24(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&(value as u32).to_be_bytes()[1..]);
}

pub fn increment_seq(seq: &mut u64) -> io::Result<()> {
    *seq = seq
        .checked_add(1)
        .ok_or_else(|| Error::other("TLS sequence number exhausted"))?;
    Ok(())
}

pub fn alert_error(level: u8, description: u8) -> Error {
    if level == ALERT_LEVEL_WARNING && description == ALERT_DESC_CLOSE_NOTIFY {
        return Error::new(ErrorKind::UnexpectedEof, "peer closed connection");
    }
    Error::new(
        ErrorKind::ConnectionAborted,
        format!("received fatal alert: {}", description),
    )
}
