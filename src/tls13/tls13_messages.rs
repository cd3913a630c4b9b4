// TLS 1.3 handshake message construction and parsing.
//
// Every message here includes its 4-byte handshake header. For ClientHello and
// ServerHello the 32-byte random therefore always sits at bytes 6..38.

use std::io::{self, Error, ErrorKind, Result};
use std::net::IpAddr;

use super::common::*;
use super::tls13_cipher_suite::CipherSuite;
use super::tls13_profile::{ClientHelloProfile, ExtensionSlot, GreaseValues};
use crate::buf_reader::BufReader;

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}

fn expect_type(message: &[u8], msg_type: u8, name: &str) -> Result<()> {
    if message.len() < 4 || message[0] != msg_type {
        return Err(invalid(format!(
            "expected {} (type {}), got type {:?}",
            name,
            msg_type,
            message.first()
        )));
    }
    let len = u32::from_be_bytes([0, message[1], message[2], message[3]]) as usize;
    if len != message.len() - 4 {
        return Err(invalid(format!(
            "{} length mismatch: header says {}, have {}",
            name,
            len,
            message.len() - 4
        )));
    }
    Ok(())
}

fn put_extension(out: &mut Vec<u8>, ext_type: u16, body: &[u8]) {
    out.extend_from_slice(&ext_type.to_be_bytes());
    put_u16(out, body.len());
    out.extend_from_slice(body);
}

fn u16_list(values: &[u16], len_bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len_bytes + values.len() * 2);
    if len_bytes == 1 {
        out.push((values.len() * 2) as u8);
    } else {
        put_u16(&mut out, values.len() * 2);
    }
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

fn alpn_body(protocols: &[Vec<u8>]) -> Vec<u8> {
    let mut list = Vec::new();
    for p in protocols {
        list.push(p.len() as u8);
        list.extend_from_slice(p);
    }
    let mut body = Vec::with_capacity(2 + list.len());
    put_u16(&mut body, list.len());
    body.extend_from_slice(&list);
    body
}

/// Construct a ClientHello shaped by `profile`.
///
/// `server_name` is omitted from the SNI extension when it is an IP literal.
pub fn construct_client_hello(
    profile: ClientHelloProfile,
    client_random: &[u8; 32],
    session_id: &[u8],
    x25519_public_key: &[u8],
    server_name: Option<&str>,
    alpn_protocols: &[Vec<u8>],
    cipher_suites: &[CipherSuite],
) -> Result<Vec<u8>> {
    if session_id.len() > 32 {
        return Err(Error::new(ErrorKind::InvalidInput, "session id too long"));
    }
    let grease = GreaseValues::random();

    let mut body = Vec::with_capacity(512);
    body.extend_from_slice(&VERSION_TLS_1_2.to_be_bytes());
    body.extend_from_slice(client_random);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);
    body.extend_from_slice(&u16_list(
        &profile.cipher_suite_ids(cipher_suites, &grease),
        2,
    ));
    // compression methods: null only
    body.extend_from_slice(&[0x01, 0x00]);

    let sni = server_name.filter(|name| !name.is_empty() && name.parse::<IpAddr>().is_err());

    let mut extensions = Vec::with_capacity(400);
    for slot in profile.extensions() {
        match slot {
            ExtensionSlot::GreaseFirst => put_extension(&mut extensions, grease.first_extension, &[]),
            ExtensionSlot::GreaseLast => put_extension(&mut extensions, grease.last_extension, &[0]),
            ExtensionSlot::ServerName => {
                if let Some(name) = sni {
                    let mut ext = Vec::with_capacity(5 + name.len());
                    put_u16(&mut ext, name.len() + 3);
                    ext.push(0x00); // host_name
                    put_u16(&mut ext, name.len());
                    ext.extend_from_slice(name.as_bytes());
                    put_extension(&mut extensions, EXT_SERVER_NAME, &ext);
                }
            }
            ExtensionSlot::ExtendedMasterSecret => {
                put_extension(&mut extensions, EXT_EXTENDED_MASTER_SECRET, &[])
            }
            ExtensionSlot::RenegotiationInfo => {
                put_extension(&mut extensions, EXT_RENEGOTIATION_INFO, &[0x00])
            }
            ExtensionSlot::SupportedGroups => put_extension(
                &mut extensions,
                EXT_SUPPORTED_GROUPS,
                &u16_list(&profile.groups(&grease), 2),
            ),
            ExtensionSlot::EcPointFormats => {
                put_extension(&mut extensions, EXT_EC_POINT_FORMATS, &[0x01, 0x00])
            }
            ExtensionSlot::SessionTicket => put_extension(&mut extensions, EXT_SESSION_TICKET, &[]),
            ExtensionSlot::Alpn => {
                if !alpn_protocols.is_empty() {
                    put_extension(&mut extensions, EXT_ALPN, &alpn_body(alpn_protocols));
                }
            }
            ExtensionSlot::StatusRequest => put_extension(
                &mut extensions,
                EXT_STATUS_REQUEST,
                &[0x01, 0x00, 0x00, 0x00, 0x00],
            ),
            ExtensionSlot::SignatureAlgorithms => put_extension(
                &mut extensions,
                EXT_SIGNATURE_ALGORITHMS,
                &u16_list(profile.signature_schemes(), 2),
            ),
            ExtensionSlot::SignedCertificateTimestamp => {
                put_extension(&mut extensions, EXT_SIGNED_CERTIFICATE_TIMESTAMP, &[])
            }
            ExtensionSlot::KeyShare => {
                let mut shares = Vec::with_capacity(48);
                if profile.uses_grease() {
                    shares.extend_from_slice(&grease.group.to_be_bytes());
                    shares.extend_from_slice(&[0x00, 0x01, 0x00]);
                }
                shares.extend_from_slice(&GROUP_X25519.to_be_bytes());
                put_u16(&mut shares, x25519_public_key.len());
                shares.extend_from_slice(x25519_public_key);
                let mut ext = Vec::with_capacity(2 + shares.len());
                put_u16(&mut ext, shares.len());
                ext.extend_from_slice(&shares);
                put_extension(&mut extensions, EXT_KEY_SHARE, &ext);
            }
            ExtensionSlot::PskKeyExchangeModes => {
                // psk_dhe_ke only
                put_extension(&mut extensions, EXT_PSK_KEY_EXCHANGE_MODES, &[0x01, 0x01])
            }
            ExtensionSlot::SupportedVersions => put_extension(
                &mut extensions,
                EXT_SUPPORTED_VERSIONS,
                &u16_list(&profile.supported_versions(&grease), 1),
            ),
            ExtensionSlot::Padding => {
                if let Some(target) = profile.padded_length() {
                    // handshake header + body + extensions length field + padding header
                    let current = 4 + body.len() + 2 + extensions.len() + 4;
                    if current <= target {
                        put_extension(&mut extensions, EXT_PADDING, &vec![0u8; target - current]);
                    }
                }
            }
        }
    }

    put_u16(&mut body, extensions.len());
    body.extend_from_slice(&extensions);

    Ok(handshake_message(HANDSHAKE_TYPE_CLIENT_HELLO, &body))
}

/// Fields of a received ClientHello the server needs.
#[derive(Debug, Clone, Default)]
pub struct ClientHelloInfo {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub server_name: Option<String>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub supported_versions: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub key_shares: Vec<(u16, Vec<u8>)>,
    pub signature_schemes: Vec<u16>,
}

impl ClientHelloInfo {
    pub fn offers_tls13(&self) -> bool {
        self.supported_versions.contains(&VERSION_TLS_1_3)
    }

    pub fn x25519_key_share(&self) -> Option<&[u8]> {
        self.key_shares
            .iter()
            .find(|(group, key)| *group == GROUP_X25519 && key.len() == 32)
            .map(|(_, key)| key.as_slice())
    }
}

pub fn parse_client_hello(message: &[u8]) -> Result<ClientHelloInfo> {
    expect_type(message, HANDSHAKE_TYPE_CLIENT_HELLO, "ClientHello")?;
    let mut reader = BufReader::new(&message[4..]);
    let mut info = ClientHelloInfo::default();

    reader.read_u16_be()?; // legacy_version
    info.random.copy_from_slice(reader.read_slice(32)?);
    info.session_id = reader.read_u8_prefixed()?.to_vec();

    let suites = reader.read_u16_prefixed()?;
    info.cipher_suites = suites
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    reader.read_u8_prefixed()?; // compression methods

    if reader.is_consumed() {
        return Ok(info);
    }

    let mut extensions = BufReader::new(reader.read_u16_prefixed()?);
    while !extensions.is_consumed() {
        let ext_type = extensions.read_u16_be()?;
        let mut ext = BufReader::new(extensions.read_u16_prefixed()?);
        match ext_type {
            EXT_SERVER_NAME => {
                let mut list = BufReader::new(ext.read_u16_prefixed()?);
                while !list.is_consumed() {
                    let name_type = list.read_u8()?;
                    let name = list.read_u16_prefixed()?;
                    if name_type == 0 {
                        info.server_name = Some(
                            std::str::from_utf8(name)
                                .map_err(|_| invalid("server_name is not UTF-8"))?
                                .to_string(),
                        );
                    }
                }
            }
            EXT_ALPN => {
                let mut list = BufReader::new(ext.read_u16_prefixed()?);
                while !list.is_consumed() {
                    info.alpn_protocols.push(list.read_u8_prefixed()?.to_vec());
                }
            }
            EXT_SUPPORTED_VERSIONS => {
                let list = ext.read_u8_prefixed()?;
                info.supported_versions = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_SUPPORTED_GROUPS => {
                let list = ext.read_u16_prefixed()?;
                info.supported_groups = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_SIGNATURE_ALGORITHMS => {
                let list = ext.read_u16_prefixed()?;
                info.signature_schemes = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_KEY_SHARE => {
                let mut list = BufReader::new(ext.read_u16_prefixed()?);
                while !list.is_consumed() {
                    let group = list.read_u16_be()?;
                    let key = list.read_u16_prefixed()?;
                    info.key_shares.push((group, key.to_vec()));
                }
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Construct ServerHello message
pub fn construct_server_hello(
    server_random: &[u8; 32],
    session_id: &[u8],
    cipher_suite: u16,
    x25519_public_key: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&VERSION_TLS_1_2.to_be_bytes());
    body.extend_from_slice(server_random);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);
    body.extend_from_slice(&cipher_suite.to_be_bytes());
    body.push(0x00);

    let mut extensions = Vec::with_capacity(48);
    put_extension(&mut extensions, EXT_SUPPORTED_VERSIONS, &VERSION_TLS_1_3.to_be_bytes());
    let mut share = Vec::with_capacity(4 + x25519_public_key.len());
    share.extend_from_slice(&GROUP_X25519.to_be_bytes());
    put_u16(&mut share, x25519_public_key.len());
    share.extend_from_slice(x25519_public_key);
    put_extension(&mut extensions, EXT_KEY_SHARE, &share);

    put_u16(&mut body, extensions.len());
    body.extend_from_slice(&extensions);

    handshake_message(HANDSHAKE_TYPE_SERVER_HELLO, &body)
}

#[derive(Debug, Clone)]
pub struct ServerHelloInfo {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub selected_version: Option<u16>,
    pub key_share: Option<(u16, Vec<u8>)>,
}

impl ServerHelloInfo {
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }
}

pub fn parse_server_hello(message: &[u8]) -> Result<ServerHelloInfo> {
    expect_type(message, HANDSHAKE_TYPE_SERVER_HELLO, "ServerHello")?;
    let mut reader = BufReader::new(&message[4..]);

    reader.read_u16_be()?; // legacy_version
    let mut random = [0u8; 32];
    random.copy_from_slice(reader.read_slice(32)?);
    let session_id = reader.read_u8_prefixed()?.to_vec();
    let cipher_suite = reader.read_u16_be()?;
    reader.read_u8()?; // compression

    let mut info = ServerHelloInfo {
        random,
        session_id,
        cipher_suite,
        selected_version: None,
        key_share: None,
    };
    if reader.is_consumed() {
        return Ok(info);
    }

    let mut extensions = BufReader::new(reader.read_u16_prefixed()?);
    while !extensions.is_consumed() {
        let ext_type = extensions.read_u16_be()?;
        let mut ext = BufReader::new(extensions.read_u16_prefixed()?);
        match ext_type {
            EXT_SUPPORTED_VERSIONS => info.selected_version = Some(ext.read_u16_be()?),
            EXT_KEY_SHARE => {
                let group = ext.read_u16_be()?;
                // a HelloRetryRequest carries only the group
                let key = if ext.is_consumed() {
                    Vec::new()
                } else {
                    ext.read_u16_prefixed()?.to_vec()
                };
                info.key_share = Some((group, key));
            }
            _ => {}
        }
    }
    Ok(info)
}

/// Construct EncryptedExtensions, optionally carrying the selected ALPN protocol.
pub fn construct_encrypted_extensions(alpn: Option<&[u8]>) -> Vec<u8> {
    let mut extensions = Vec::new();
    if let Some(protocol) = alpn {
        put_extension(&mut extensions, EXT_ALPN, &alpn_body(&[protocol.to_vec()]));
    }
    let mut body = Vec::with_capacity(2 + extensions.len());
    put_u16(&mut body, extensions.len());
    body.extend_from_slice(&extensions);
    handshake_message(HANDSHAKE_TYPE_ENCRYPTED_EXTENSIONS, &body)
}

/// Returns the ALPN protocol selected by the server, if any.
pub fn parse_encrypted_extensions(message: &[u8]) -> Result<Option<Vec<u8>>> {
    expect_type(
        message,
        HANDSHAKE_TYPE_ENCRYPTED_EXTENSIONS,
        "EncryptedExtensions",
    )?;
    let mut reader = BufReader::new(&message[4..]);
    let mut extensions = BufReader::new(reader.read_u16_prefixed()?);
    let mut alpn = None;
    while !extensions.is_consumed() {
        let ext_type = extensions.read_u16_be()?;
        let mut ext = BufReader::new(extensions.read_u16_prefixed()?);
        if ext_type == EXT_ALPN {
            let mut list = BufReader::new(ext.read_u16_prefixed()?);
            let protocol = list.read_u8_prefixed()?;
            if !list.is_consumed() {
                return Err(invalid("server selected more than one ALPN protocol"));
            }
            alpn = Some(protocol.to_vec());
        }
    }
    Ok(alpn)
}

/// Construct a Certificate message from a DER chain (leaf first).
pub fn construct_certificate<C: AsRef<[u8]>>(chain: &[C]) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in chain {
        let der = cert.as_ref();
        put_u24(&mut list, der.len());
        list.extend_from_slice(der);
        list.extend_from_slice(&[0x00, 0x00]); // no per-certificate extensions
    }
    let mut body = Vec::with_capacity(4 + list.len());
    body.push(0x00); // certificate_request_context
    put_u24(&mut body, list.len());
    body.extend_from_slice(&list);
    handshake_message(HANDSHAKE_TYPE_CERTIFICATE, &body)
}

/// Returns the DER certificates of a Certificate message, leaf first.
pub fn parse_certificate(message: &[u8]) -> Result<Vec<Vec<u8>>> {
    expect_type(message, HANDSHAKE_TYPE_CERTIFICATE, "Certificate")?;
    let mut reader = BufReader::new(&message[4..]);
    reader.read_u8_prefixed()?; // certificate_request_context
    let mut list = BufReader::new(reader.read_u24_prefixed()?);
    let mut chain = Vec::new();
    while !list.is_consumed() {
        chain.push(list.read_u24_prefixed()?.to_vec());
        list.read_u16_prefixed()?;
    }
    if chain.is_empty() {
        return Err(invalid("server sent an empty certificate chain"));
    }
    Ok(chain)
}

/// Content covered by a CertificateVerify signature (RFC 8446 Section 4.4.3).
pub fn certificate_verify_message(transcript_hash: &[u8], server: bool) -> Vec<u8> {
    let context: &[u8] = if server {
        b"TLS 1.3, server CertificateVerify"
    } else {
        b"TLS 1.3, client CertificateVerify"
    };
    let mut content = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    content.extend_from_slice(&[0x20u8; 64]);
    content.extend_from_slice(context);
    content.push(0x00);
    content.extend_from_slice(transcript_hash);
    content
}

pub fn construct_certificate_verify(scheme: u16, signature: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + signature.len());
    body.extend_from_slice(&scheme.to_be_bytes());
    put_u16(&mut body, signature.len());
    body.extend_from_slice(signature);
    handshake_message(HANDSHAKE_TYPE_CERTIFICATE_VERIFY, &body)
}

pub fn parse_certificate_verify(message: &[u8]) -> Result<(u16, Vec<u8>)> {
    expect_type(
        message,
        HANDSHAKE_TYPE_CERTIFICATE_VERIFY,
        "CertificateVerify",
    )?;
    let mut reader = BufReader::new(&message[4..]);
    let scheme = reader.read_u16_be()?;
    let signature = reader.read_u16_prefixed()?.to_vec();
    Ok((scheme, signature))
}

pub fn construct_finished(verify_data: &[u8]) -> Vec<u8> {
    handshake_message(HANDSHAKE_TYPE_FINISHED, verify_data)
}

pub fn parse_finished(message: &[u8]) -> io::Result<&[u8]> {
    expect_type(message, HANDSHAKE_TYPE_FINISHED, "Finished")?;
    Ok(&message[4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls13::tls13_cipher_suite::DEFAULT_CIPHER_SUITES;
    use crate::tls13::tls13_profile::is_grease;

    fn build(profile: ClientHelloProfile, server_name: Option<&str>) -> Vec<u8> {
        construct_client_hello(
            profile,
            &[0x11; 32],
            &[0x22; 32],
            &[0x33; 32],
            server_name,
            &[b"h2".to_vec(), b"http/1.1".to_vec()],
            DEFAULT_CIPHER_SUITES,
        )
        .unwrap()
    }

    #[test]
    fn test_client_hello_round_trip_fields() {
        for profile in [
            ClientHelloProfile::Chrome,
            ClientHelloProfile::Firefox,
            ClientHelloProfile::Minimal,
        ] {
            let hello = build(profile, Some("cover.example"));
            assert_eq!(hello[0], HANDSHAKE_TYPE_CLIENT_HELLO);
            assert_eq!(&hello[HELLO_RANDOM_OFFSET..HELLO_RANDOM_OFFSET + 32], &[0x11; 32]);

            let info = parse_client_hello(&hello).unwrap();
            assert_eq!(info.random, [0x11; 32]);
            assert_eq!(info.session_id, vec![0x22; 32]);
            assert_eq!(info.server_name.as_deref(), Some("cover.example"));
            assert_eq!(info.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
            assert!(info.offers_tls13());
            assert_eq!(info.x25519_key_share(), Some(&[0x33u8; 32][..]));
            assert!(info.cipher_suites.contains(&0x1301));
        }
    }

    #[test]
    fn test_chrome_hello_is_padded_and_greased() {
        let hello = build(ClientHelloProfile::Chrome, Some("cover.example"));
        assert_eq!(hello.len(), 512);
        let info = parse_client_hello(&hello).unwrap();
        assert!(is_grease(info.cipher_suites[0]));
        assert!(is_grease(info.supported_groups[0]));
        assert!(is_grease(info.supported_versions[0]));
    }

    #[test]
    fn test_ip_server_name_is_not_sent() {
        let hello = build(ClientHelloProfile::Minimal, Some("192.0.2.1"));
        let info = parse_client_hello(&hello).unwrap();
        assert!(info.server_name.is_none());
    }

    #[test]
    fn test_server_hello_round_trip() {
        let hello = construct_server_hello(&[0x42; 32], &[0x99; 32], 0x1302, &[0xAA; 32]);
        assert_eq!(hello[0], HANDSHAKE_TYPE_SERVER_HELLO);
        let info = parse_server_hello(&hello).unwrap();
        assert_eq!(info.random, [0x42; 32]);
        assert_eq!(info.session_id, vec![0x99; 32]);
        assert_eq!(info.cipher_suite, 0x1302);
        assert_eq!(info.selected_version, Some(VERSION_TLS_1_3));
        assert_eq!(info.key_share, Some((GROUP_X25519, vec![0xAA; 32])));
        assert!(!info.is_hello_retry_request());
    }

    #[test]
    fn test_encrypted_extensions_alpn() {
        let ee = construct_encrypted_extensions(Some(b"h2"));
        assert_eq!(parse_encrypted_extensions(&ee).unwrap(), Some(b"h2".to_vec()));
        let ee = construct_encrypted_extensions(None);
        assert_eq!(ee, vec![HANDSHAKE_TYPE_ENCRYPTED_EXTENSIONS, 0, 0, 2, 0, 0]);
        assert_eq!(parse_encrypted_extensions(&ee).unwrap(), None);
    }

    #[test]
    fn test_certificate_chain_round_trip() {
        let chain = vec![vec![0xBB; 100], vec![0xCC; 50]];
        let msg = construct_certificate(&chain);
        assert_eq!(parse_certificate(&msg).unwrap(), chain);
        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(parse_certificate(&construct_certificate(&empty)).is_err());
    }

    #[test]
    fn test_certificate_verify_round_trip() {
        let msg = construct_certificate_verify(0x0804, &[0x55; 256]);
        let (scheme, sig) = parse_certificate_verify(&msg).unwrap();
        assert_eq!(scheme, 0x0804);
        assert_eq!(sig.len(), 256);

        let content = certificate_verify_message(&[0x01; 32], true);
        assert_eq!(&content[..64], &[0x20; 64]);
        assert_eq!(content.len(), 64 + 33 + 1 + 32);
    }

    #[test]
    fn test_finished_and_length_mismatch() {
        let msg = construct_finished(&[0xCC; 32]);
        assert_eq!(msg.len(), 36);
        assert_eq!(parse_finished(&msg).unwrap(), &[0xCC; 32]);
        let mut truncated = msg.clone();
        truncated.pop();
        assert!(parse_finished(&truncated).is_err());
    }
}
