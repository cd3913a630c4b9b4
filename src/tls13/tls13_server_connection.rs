// TLS 1.3 server connection driven by an already-received ClientHello.
//
// The whole server flight (ServerHello, EncryptedExtensions, Certificate,
// CertificateVerify, Finished) is queued on construction; afterwards the
// connection only waits for the client Finished and then carries application data.

use std::io::{self, Read, Write};
use std::sync::Arc;

use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use rustls::SignatureScheme;
use rustls::sign::CertifiedKey;

use super::common::*;
use super::tls13_cipher_suite::{CipherSuite, DEFAULT_CIPHER_SUITES};
use super::tls13_hello_auth::HelloAuthenticator;
use super::tls13_keys::{
    compute_finished_verify_data, derive_application_secrets, derive_handshake_keys,
    generate_x25519_key_pair, verify_finished, x25519_shared_secret,
};
use super::tls13_messages::*;
use super::tls13_reader_writer::{Tls13Reader, Tls13Writer};
use super::tls13_record_layer::{RecordLayer, Tls13IoState};
use super::tls13_records::RecordCipher;

#[derive(Clone)]
pub struct Tls13ServerConfig {
    /// Server preference order (empty = defaults)
    pub cipher_suites: Vec<CipherSuite>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub certified_key: Arc<CertifiedKey>,
    /// Stamps the ServerHello random.
    pub authenticator: Option<Arc<dyn HelloAuthenticator>>,
}

impl std::fmt::Debug for Tls13ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tls13ServerConfig")
            .field("cipher_suites", &self.cipher_suites)
            .field("alpn_protocols", &self.alpn_protocols.len())
            .field("authenticated", &self.authenticator.is_some())
            .finish()
    }
}

struct AwaitingClientFinished {
    cipher_suite: CipherSuite,
    read: RecordCipher,
    client_handshake_traffic_secret: Vec<u8>,
    handshake_hash: Vec<u8>,
    client_application_secret: Vec<u8>,
    server_application_secret: Vec<u8>,
}

enum HandshakeState {
    AwaitingClientFinished(Box<AwaitingClientFinished>),
    Complete,
}

pub struct Tls13ServerConnection {
    state: HandshakeState,
    handshake_buf: Vec<u8>,
    server_name: Option<String>,
    negotiated_cipher_suite: CipherSuite,
    negotiated_alpn: Option<Vec<u8>>,
    record_layer: RecordLayer,
}

fn select_cipher_suite(server: &[CipherSuite], offered: &[u16]) -> Option<CipherSuite> {
    let server = if server.is_empty() {
        DEFAULT_CIPHER_SUITES
    } else {
        server
    };
    server.iter().copied().find(|cs| offered.contains(&cs.id()))
}

fn select_alpn(server: &[Vec<u8>], offered: &[Vec<u8>]) -> Option<Vec<u8>> {
    server.iter().find(|p| offered.contains(p)).cloned()
}

impl Tls13ServerConnection {
    /// Answer `client_hello` (a complete handshake message including its header).
    pub fn new(config: &Tls13ServerConfig, client_hello: &[u8]) -> io::Result<Self> {
        let info = parse_client_hello(client_hello)?;
        if !info.offers_tls13() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "client does not offer TLS 1.3",
            ));
        }
        let cipher_suite = select_cipher_suite(&config.cipher_suites, &info.cipher_suites)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "no shared TLS 1.3 cipher suite")
            })?;
        let client_share = info.x25519_key_share().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "client did not offer an x25519 key share",
            )
        })?;

        let offered_schemes: Vec<SignatureScheme> = info
            .signature_schemes
            .iter()
            .map(|s| SignatureScheme::from(*s))
            .collect();
        let signer = config
            .certified_key
            .key
            .choose_scheme(&offered_schemes)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "no signature scheme shared with client",
                )
            })?;

        let (private_key, public_key) = generate_x25519_key_pair()?;
        let shared_secret = x25519_shared_secret(&private_key, client_share)?;

        let mut server_random = [0u8; 32];
        SystemRandom::new()
            .fill(&mut server_random)
            .map_err(|_| io::Error::other("RNG failed"))?;
        let mut server_hello =
            construct_server_hello(&server_random, &info.session_id, cipher_suite.id(), &public_key);
        if let Some(authenticator) = config.authenticator.as_ref() {
            authenticator.stamp(&mut server_hello)?;
        }

        let mut transcript = Vec::with_capacity(client_hello.len() + server_hello.len() + 4096);
        transcript.extend_from_slice(client_hello);
        transcript.extend_from_slice(&server_hello);
        let keys = derive_handshake_keys(
            cipher_suite,
            &shared_secret,
            &cipher_suite.transcript_hash(&transcript),
        )?;

        let negotiated_alpn = select_alpn(&config.alpn_protocols, &info.alpn_protocols);

        let mut flight = construct_encrypted_extensions(negotiated_alpn.as_deref());
        let certificate = construct_certificate(&config.certified_key.cert);
        flight.extend_from_slice(&certificate);
        transcript.extend_from_slice(&flight);

        let signed = certificate_verify_message(&cipher_suite.transcript_hash(&transcript), true);
        let signature = signer.sign(&signed).map_err(|e| {
            io::Error::other(format!("failed to sign CertificateVerify: {}", e))
        })?;
        let certificate_verify = construct_certificate_verify(u16::from(signer.scheme()), &signature);
        transcript.extend_from_slice(&certificate_verify);
        flight.extend_from_slice(&certificate_verify);

        let verify_data = compute_finished_verify_data(
            cipher_suite,
            &keys.server_handshake_traffic_secret,
            &cipher_suite.transcript_hash(&transcript),
        )?;
        let finished = construct_finished(&verify_data);
        transcript.extend_from_slice(&finished);
        flight.extend_from_slice(&finished);

        let handshake_hash = cipher_suite.transcript_hash(&transcript);
        let (client_application_secret, server_application_secret) =
            derive_application_secrets(cipher_suite, &keys.master_secret, &handshake_hash)?;

        let mut record_layer = RecordLayer::new("tls13 server");
        let out = record_layer.ciphertext_write_buf();
        plaintext_handshake_records(VERSION_TLS_1_2, &server_hello, out);
        if !info.session_id.is_empty() {
            out.extend_from_slice(&record_header(
                CONTENT_TYPE_CHANGE_CIPHER_SPEC,
                VERSION_TLS_1_2,
                1,
            ));
            out.push(0x01);
        }
        let mut write = RecordCipher::from_secret(cipher_suite, &keys.server_handshake_traffic_secret)?;
        write.seal_record(CONTENT_TYPE_HANDSHAKE, &flight, out)?;

        let read = RecordCipher::from_secret(cipher_suite, &keys.client_handshake_traffic_secret)?;

        log::debug!(
            "TLS13 SERVER: flight queued, suite {}, sni {:?}, alpn {:?}",
            cipher_suite,
            info.server_name,
            negotiated_alpn.as_ref().map(|p| String::from_utf8_lossy(p).into_owned())
        );

        Ok(Self {
            state: HandshakeState::AwaitingClientFinished(Box::new(AwaitingClientFinished {
                cipher_suite,
                read,
                client_handshake_traffic_secret: keys.client_handshake_traffic_secret,
                handshake_hash,
                client_application_secret,
                server_application_secret,
            })),
            handshake_buf: Vec::new(),
            server_name: info.server_name,
            negotiated_cipher_suite: cipher_suite,
            negotiated_alpn,
            record_layer,
        })
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn negotiated_cipher_suite(&self) -> CipherSuite {
        self.negotiated_cipher_suite
    }

    pub fn negotiated_alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_deref()
    }

    pub fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        self.record_layer.read_tls(rd)
    }

    pub fn process_new_packets(&mut self) -> io::Result<Tls13IoState> {
        self.record_layer.check_fatal()?;
        if self.record_layer.received_close_notify() {
            return Ok(self.record_layer.io_state());
        }
        let result = self.process_new_packets_inner();
        if let Err(ref e) = result {
            self.record_layer.record_error(e);
        }
        result
    }

    fn process_new_packets_inner(&mut self) -> io::Result<Tls13IoState> {
        while !matches!(self.state, HandshakeState::Complete) {
            if !self.process_client_finished()? {
                return Ok(self.record_layer.io_state());
            }
        }
        self.record_layer.process_application_records()?;
        Ok(self.record_layer.io_state())
    }

    fn process_client_finished(&mut self) -> io::Result<bool> {
        let Some((header, payload)) = self.record_layer.next_record()? else {
            return Ok(false);
        };
        let HandshakeState::AwaitingClientFinished(hs) = &mut self.state else {
            return Ok(false);
        };
        match header[0] {
            CONTENT_TYPE_CHANGE_CIPHER_SPEC => return Ok(true),
            CONTENT_TYPE_APPLICATION_DATA => {}
            CONTENT_TYPE_ALERT if payload.len() >= 2 => {
                return Err(alert_error(payload[0], payload[1]));
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected record type 0x{:02x} during handshake", other),
                ));
            }
        }

        let (content_type, plaintext) = hs.read.open_record(&header, &payload)?;
        match content_type {
            CONTENT_TYPE_HANDSHAKE => self.handshake_buf.extend_from_slice(&plaintext),
            CONTENT_TYPE_ALERT if plaintext.len() >= 2 => {
                return Err(alert_error(plaintext[0], plaintext[1]));
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected content before client Finished",
                ));
            }
        }

        let Some(message) = take_handshake_message(&mut self.handshake_buf)? else {
            return Ok(true);
        };
        if !self.handshake_buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "handshake data after client Finished",
            ));
        }
        verify_finished(
            hs.cipher_suite,
            &hs.client_handshake_traffic_secret,
            &hs.handshake_hash,
            parse_finished(&message)?,
        )?;

        let cipher_suite = hs.cipher_suite;
        let read_secret = std::mem::take(&mut hs.client_application_secret);
        let write_secret = std::mem::take(&mut hs.server_application_secret);
        self.record_layer
            .install_traffic_keys(cipher_suite, read_secret, write_secret)?;
        self.state = HandshakeState::Complete;
        log::debug!("TLS13 SERVER: handshake complete");
        Ok(true)
    }

    pub fn reader(&mut self) -> Tls13Reader<'_> {
        self.record_layer.reader()
    }

    pub fn writer(&mut self) -> Tls13Writer<'_> {
        self.record_layer.writer()
    }

    pub fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        self.record_layer.write_tls(wr)
    }

    pub fn wants_write(&self) -> bool {
        self.record_layer.wants_write()
    }

    pub fn wants_read(&self) -> bool {
        self.record_layer.wants_read(self.is_handshaking())
    }

    pub fn is_handshaking(&self) -> bool {
        !matches!(self.state, HandshakeState::Complete)
    }

    pub fn send_close_notify(&mut self) {
        self.record_layer.send_close_notify();
    }
}

pub fn feed_tls13_server_connection(
    connection: &mut Tls13ServerConnection,
    data: &[u8],
) -> io::Result<()> {
    let mut cursor = io::Cursor::new(data);
    let mut i = 0;
    while i < data.len() {
        let n = connection.read_tls(&mut cursor).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to feed TLS connection: {e}"),
            )
        })?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "tls13 server connection did not consume all bytes: fed {}/{} bytes",
                    i,
                    data.len()
                ),
            ));
        }
        i += n;
    }
    Ok(())
}
