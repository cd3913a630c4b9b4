// TLS 1.3 client connection with a fingerprint-controlled ClientHello.
//
// This implements a rustls-compatible API so it can sit behind CryptoConnection
// next to rustls::ClientConnection.

use std::io::{self, Read, Write};
use std::sync::Arc;

use aws_lc_rs::agreement;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::CertificateDer;

use super::common::*;
use super::tls13_cipher_suite::{CipherSuite, DEFAULT_CIPHER_SUITES};
use super::tls13_hello_auth::{HelloAuth, HelloAuthenticator};
use super::tls13_keys::{
    Tls13HandshakeKeys, compute_finished_verify_data, derive_application_secrets,
    derive_handshake_keys, generate_x25519_key_pair, verify_finished, x25519_shared_secret,
};
use super::tls13_messages::*;
use super::tls13_profile::ClientHelloProfile;
use super::tls13_reader_writer::{Tls13Reader, Tls13Writer};
use super::tls13_record_layer::{RecordLayer, Tls13IoState};
use super::tls13_records::RecordCipher;
use super::tls13_verify::{verify_certificate_chain, verify_certificate_verify};

#[derive(Clone, Default)]
pub struct Tls13ClientConfig {
    pub server_name: String,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub profile: ClientHelloProfile,
    /// Offered TLS 1.3 suites (empty = defaults)
    pub cipher_suites: Vec<CipherSuite>,
    /// Stamps the ClientHello random and checks the ServerHello random.
    pub authenticator: Option<Arc<dyn HelloAuthenticator>>,
    /// Chain verifier; None skips certificate and CertificateVerify checks.
    pub verifier: Option<Arc<dyn ServerCertVerifier>>,
}

impl std::fmt::Debug for Tls13ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tls13ClientConfig")
            .field("server_name", &self.server_name)
            .field("profile", &self.profile)
            .field("cipher_suites", &self.cipher_suites)
            .field("authenticated", &self.authenticator.is_some())
            .field("verified", &self.verifier.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    EncryptedExtensions,
    Certificate,
    CertificateVerify,
    Finished,
}

struct EncryptedHandshake {
    cipher_suite: CipherSuite,
    keys: Tls13HandshakeKeys,
    transcript: Vec<u8>,
    read: RecordCipher,
    expect: Expect,
}

enum HandshakeState {
    AwaitingServerHello,
    Encrypted(Box<EncryptedHandshake>),
    Complete,
}

pub struct Tls13ClientConnection {
    config: Tls13ClientConfig,
    state: HandshakeState,
    client_hello: Vec<u8>,
    session_id: [u8; 32],
    key_exchange: Option<agreement::PrivateKey>,
    handshake_buf: Vec<u8>,
    hello_auth: HelloAuth,
    negotiated_cipher_suite: Option<CipherSuite>,
    negotiated_alpn: Option<Vec<u8>>,
    peer_certificates: Vec<CertificateDer<'static>>,
    record_layer: RecordLayer,
}

impl Tls13ClientConnection {
    /// Create a connection with its ClientHello already queued for write_tls().
    pub fn new(mut config: Tls13ClientConfig) -> io::Result<Self> {
        if config.cipher_suites.is_empty() {
            config.cipher_suites = DEFAULT_CIPHER_SUITES.to_vec();
        }
        let rng = SystemRandom::new();
        let mut client_random = [0u8; 32];
        rng.fill(&mut client_random)
            .map_err(|_| io::Error::other("RNG failed"))?;
        let mut session_id = [0u8; 32];
        rng.fill(&mut session_id)
            .map_err(|_| io::Error::other("RNG failed"))?;
        let (private_key, public_key) = generate_x25519_key_pair()?;

        let mut client_hello = construct_client_hello(
            config.profile,
            &client_random,
            &session_id,
            &public_key,
            Some(config.server_name.as_str()),
            &config.alpn_protocols,
            &config.cipher_suites,
        )?;
        if let Some(authenticator) = config.authenticator.as_ref() {
            authenticator.stamp(&mut client_hello)?;
        }

        let hello_auth = if config.authenticator.is_some() {
            HelloAuth::Pending
        } else {
            HelloAuth::Unchecked
        };

        let mut record_layer = RecordLayer::new("tls13 client");
        plaintext_handshake_records(
            VERSION_TLS_1_0,
            &client_hello,
            record_layer.ciphertext_write_buf(),
        );

        log::debug!(
            "TLS13 CLIENT: ClientHello queued ({} bytes, profile {})",
            client_hello.len(),
            config.profile
        );

        Ok(Self {
            config,
            state: HandshakeState::AwaitingServerHello,
            client_hello,
            session_id,
            key_exchange: Some(private_key),
            handshake_buf: Vec::new(),
            hello_auth,
            negotiated_cipher_suite: None,
            negotiated_alpn: None,
            peer_certificates: Vec::new(),
            record_layer,
        })
    }

    /// The ClientHello handshake message as sent (including its header).
    pub fn client_hello(&self) -> &[u8] {
        &self.client_hello
    }

    pub fn server_hello_auth(&self) -> HelloAuth {
        self.hello_auth
    }

    pub fn negotiated_alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_deref()
    }

    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.negotiated_cipher_suite
    }

    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    pub fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        self.record_layer.read_tls(rd)
    }

    /// Process buffered records, looping until no more progress can be made so
    /// that application data arriving with the server Finished is not stranded.
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
        loop {
            let progressed = match self.state {
                HandshakeState::AwaitingServerHello => {
                    let progressed = self.process_server_hello()?;
                    // stop so the caller can act on a rejected token; the next call resumes
                    if self.hello_auth.is_rejected() {
                        break;
                    }
                    progressed
                }
                HandshakeState::Encrypted(_) => self.process_encrypted_handshake()?,
                HandshakeState::Complete => {
                    self.record_layer.process_application_records()?;
                    break;
                }
            };
            if !progressed {
                break;
            }
        }
        Ok(self.record_layer.io_state())
    }

    fn process_server_hello(&mut self) -> io::Result<bool> {
        let Some((header, payload)) = self.record_layer.next_record()? else {
            return Ok(false);
        };
        match header[0] {
            CONTENT_TYPE_HANDSHAKE => {}
            CONTENT_TYPE_ALERT if payload.len() >= 2 => {
                return Err(alert_error(payload[0], payload[1]));
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected ServerHello record, got type 0x{:02x}", other),
                ));
            }
        }
        self.handshake_buf.extend_from_slice(&payload);
        let Some(server_hello) = take_handshake_message(&mut self.handshake_buf)? else {
            return Ok(true);
        };
        if !self.handshake_buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unencrypted handshake data after ServerHello",
            ));
        }

        let info = parse_server_hello(&server_hello)?;
        if info.is_hello_retry_request() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "HelloRetryRequest is not supported",
            ));
        }
        if info.selected_version != Some(VERSION_TLS_1_3) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "server did not negotiate TLS 1.3",
            ));
        }
        if info.session_id != self.session_id {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "ServerHello session id does not echo ClientHello",
            ));
        }
        let cipher_suite = CipherSuite::from_id(info.cipher_suite)
            .filter(|cs| self.config.cipher_suites.contains(cs))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "server selected unoffered cipher suite 0x{:04x}",
                        info.cipher_suite
                    ),
                )
            })?;
        let server_share = match info.key_share {
            Some((GROUP_X25519, ref key)) => key.as_slice(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "server did not select x25519",
                ));
            }
        };

        if let Some(authenticator) = self.config.authenticator.as_ref() {
            self.hello_auth = if authenticator.check(&server_hello) {
                HelloAuth::Verified
            } else {
                HelloAuth::Rejected
            };
            log::debug!("TLS13 CLIENT: ServerHello random {:?}", self.hello_auth);
        }

        let private_key = self.key_exchange.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "key exchange already consumed")
        })?;
        let shared_secret = x25519_shared_secret(&private_key, server_share)?;

        let mut transcript = Vec::with_capacity(self.client_hello.len() + server_hello.len() + 4096);
        transcript.extend_from_slice(&self.client_hello);
        transcript.extend_from_slice(&server_hello);
        let server_hello_hash = cipher_suite.transcript_hash(&transcript);
        let keys = derive_handshake_keys(cipher_suite, &shared_secret, &server_hello_hash)?;
        let read = RecordCipher::from_secret(cipher_suite, &keys.server_handshake_traffic_secret)?;

        log::debug!("TLS13 CLIENT: server selected {}", cipher_suite);
        self.negotiated_cipher_suite = Some(cipher_suite);
        self.state = HandshakeState::Encrypted(Box::new(EncryptedHandshake {
            cipher_suite,
            keys,
            transcript,
            read,
            expect: Expect::EncryptedExtensions,
        }));
        Ok(true)
    }

    fn process_encrypted_handshake(&mut self) -> io::Result<bool> {
        let Some((header, payload)) = self.record_layer.next_record()? else {
            return Ok(false);
        };
        let mut hs = match std::mem::replace(&mut self.state, HandshakeState::Complete) {
            HandshakeState::Encrypted(hs) => hs,
            other => {
                self.state = other;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "not in encrypted handshake state",
                ));
            }
        };
        match self.process_encrypted_record(&mut hs, &header, &payload) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.state = HandshakeState::Encrypted(hs);
                Ok(true)
            }
            Err(e) => {
                self.state = HandshakeState::Encrypted(hs);
                Err(e)
            }
        }
    }

    /// Returns true once the handshake completed with this record.
    fn process_encrypted_record(
        &mut self,
        hs: &mut EncryptedHandshake,
        header: &[u8; TLS_RECORD_HEADER_SIZE],
        payload: &[u8],
    ) -> io::Result<bool> {
        match header[0] {
            CONTENT_TYPE_CHANGE_CIPHER_SPEC => return Ok(false),
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

        let (content_type, plaintext) = hs.read.open_record(header, payload)?;
        match content_type {
            CONTENT_TYPE_HANDSHAKE => self.handshake_buf.extend_from_slice(&plaintext),
            CONTENT_TYPE_ALERT if plaintext.len() >= 2 => {
                return Err(alert_error(plaintext[0], plaintext[1]));
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected content before server Finished",
                ));
            }
        }

        while let Some(message) = take_handshake_message(&mut self.handshake_buf)? {
            if self.process_handshake_message(hs, message)? {
                if !self.handshake_buf.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "handshake data after server Finished",
                    ));
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn process_handshake_message(
        &mut self,
        hs: &mut EncryptedHandshake,
        message: Vec<u8>,
    ) -> io::Result<bool> {
        match hs.expect {
            Expect::EncryptedExtensions => {
                let alpn = parse_encrypted_extensions(&message)?;
                if let Some(ref protocol) = alpn {
                    if !self.config.alpn_protocols.contains(protocol) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "server selected an ALPN protocol we did not offer",
                        ));
                    }
                }
                self.negotiated_alpn = alpn;
                hs.expect = Expect::Certificate;
            }
            Expect::Certificate => {
                self.peer_certificates = parse_certificate(&message)?
                    .into_iter()
                    .map(CertificateDer::from)
                    .collect();
                if let Some(verifier) = self.config.verifier.as_ref() {
                    verify_certificate_chain(
                        verifier,
                        &self.peer_certificates,
                        &self.config.server_name,
                    )?;
                }
                hs.expect = Expect::CertificateVerify;
            }
            Expect::CertificateVerify => {
                let (scheme, signature) = parse_certificate_verify(&message)?;
                if self.config.verifier.is_some() {
                    let leaf = self.peer_certificates.first().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "no server certificate")
                    })?;
                    let hash = hs.cipher_suite.transcript_hash(&hs.transcript);
                    verify_certificate_verify(leaf, scheme, &signature, &hash)?;
                }
                hs.expect = Expect::Finished;
            }
            Expect::Finished => {
                let hash = hs.cipher_suite.transcript_hash(&hs.transcript);
                verify_finished(
                    hs.cipher_suite,
                    &hs.keys.server_handshake_traffic_secret,
                    &hash,
                    parse_finished(&message)?,
                )?;
                hs.transcript.extend_from_slice(&message);
                self.send_client_finished(hs)?;
                return Ok(true);
            }
        }
        hs.transcript.extend_from_slice(&message);
        Ok(false)
    }

    fn send_client_finished(&mut self, hs: &mut EncryptedHandshake) -> io::Result<()> {
        let cs = hs.cipher_suite;
        let handshake_hash = cs.transcript_hash(&hs.transcript);
        let verify_data = compute_finished_verify_data(
            cs,
            &hs.keys.client_handshake_traffic_secret,
            &handshake_hash,
        )?;
        let finished = construct_finished(&verify_data);

        // middlebox compatibility: a non-empty session id implies a CCS first
        let out = self.record_layer.ciphertext_write_buf();
        out.extend_from_slice(&record_header(
            CONTENT_TYPE_CHANGE_CIPHER_SPEC,
            VERSION_TLS_1_2,
            1,
        ));
        out.push(0x01);
        let mut write = RecordCipher::from_secret(cs, &hs.keys.client_handshake_traffic_secret)?;
        write.seal_record(CONTENT_TYPE_HANDSHAKE, &finished, out)?;

        let (client_secret, server_secret) =
            derive_application_secrets(cs, &hs.keys.master_secret, &handshake_hash)?;
        self.record_layer
            .install_traffic_keys(cs, server_secret, client_secret)?;
        log::debug!("TLS13 CLIENT: handshake complete");
        Ok(())
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

pub fn feed_tls13_client_connection(
    connection: &mut Tls13ClientConnection,
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
                    "tls13 client connection did not consume all bytes: fed {}/{} bytes",
                    i,
                    data.len()
                ),
            ));
        }
        i += n;
    }
    Ok(())
}
