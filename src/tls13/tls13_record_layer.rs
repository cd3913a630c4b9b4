// Buffers and post-handshake record processing shared by the client and
// server connections.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use super::common::*;
use super::tls13_cipher_suite::CipherSuite;
use super::tls13_keys::hkdf_expand_label;
use super::tls13_reader_writer::{Tls13Reader, Tls13Writer};
use super::tls13_records::RecordCipher;

/// Ciphertext we are willing to hold before the caller processes it.
const CIPHERTEXT_BUFFER_LIMIT: usize = 4 * TLS_MAX_RECORD_SIZE;

/// I/O state returned from process_new_packets(), shaped like rustls::IoState.
#[derive(Debug, Clone, Copy)]
pub struct Tls13IoState {
    plaintext_bytes_to_read: usize,
}

impl Tls13IoState {
    pub fn new(plaintext_bytes_to_read: usize) -> Self {
        Self {
            plaintext_bytes_to_read,
        }
    }

    pub fn plaintext_bytes_to_read(&self) -> usize {
        self.plaintext_bytes_to_read
    }
}

/// Application traffic protection for both directions.
struct TrafficKeys {
    cipher_suite: CipherSuite,
    read_secret: Vec<u8>,
    write_secret: Vec<u8>,
    read: RecordCipher,
    write: RecordCipher,
}

pub(super) struct RecordLayer {
    role: &'static str,
    tls_read_buffer: Box<[u8; TLS_MAX_RECORD_SIZE]>,
    ciphertext_read_buf: BytesMut,
    ciphertext_write_buf: Vec<u8>,
    plaintext_read_buf: BytesMut,
    plaintext_write_buf: Vec<u8>,
    post_handshake_buf: Vec<u8>,
    traffic: Option<TrafficKeys>,
    received_close_notify: bool,
    sent_close_notify: bool,
    fatal_error: Option<io::ErrorKind>,
}

impl RecordLayer {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            tls_read_buffer: Box::new([0u8; TLS_MAX_RECORD_SIZE]),
            ciphertext_read_buf: BytesMut::with_capacity(TLS_MAX_RECORD_SIZE),
            ciphertext_write_buf: Vec::with_capacity(TLS_MAX_RECORD_SIZE),
            plaintext_read_buf: BytesMut::with_capacity(TLS_MAX_RECORD_SIZE),
            plaintext_write_buf: Vec::new(),
            post_handshake_buf: Vec::new(),
            traffic: None,
            received_close_notify: false,
            sent_close_notify: false,
            fatal_error: None,
        }
    }

    pub fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        if self.ciphertext_read_buf.len() >= CIPHERTEXT_BUFFER_LIMIT {
            return Err(io::Error::other("TLS read buffer full"));
        }
        let n = rd.read(&mut self.tls_read_buffer[..])?;
        if n > 0 {
            self.ciphertext_read_buf
                .extend_from_slice(&self.tls_read_buffer[..n]);
        }
        Ok(n)
    }

    /// Pop the next complete record as (header, payload).
    pub fn next_record(&mut self) -> io::Result<Option<([u8; TLS_RECORD_HEADER_SIZE], Vec<u8>)>> {
        if self.ciphertext_read_buf.len() < TLS_RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let record_len =
            u16::from_be_bytes([self.ciphertext_read_buf[3], self.ciphertext_read_buf[4]]) as usize;
        if record_len > MAX_TLS_CIPHERTEXT_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record overflow: {} bytes", record_len),
            ));
        }
        if self.ciphertext_read_buf.len() < TLS_RECORD_HEADER_SIZE + record_len {
            return Ok(None);
        }
        let mut header = [0u8; TLS_RECORD_HEADER_SIZE];
        header.copy_from_slice(&self.ciphertext_read_buf[..TLS_RECORD_HEADER_SIZE]);
        self.ciphertext_read_buf.advance(TLS_RECORD_HEADER_SIZE);
        let payload = self.ciphertext_read_buf.split_to(record_len).to_vec();
        Ok(Some((header, payload)))
    }

    pub fn ciphertext_write_buf(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext_write_buf
    }

    pub fn check_fatal(&self) -> io::Result<()> {
        match self.fatal_error {
            Some(kind) => Err(io::Error::new(kind, "connection previously failed")),
            None => Ok(()),
        }
    }

    /// Persist errors that leave the connection unusable.
    pub fn record_error(&mut self, error: &io::Error) {
        if matches!(
            error.kind(),
            io::ErrorKind::InvalidData
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::Unsupported
        ) {
            self.fatal_error = Some(error.kind());
        }
    }

    pub fn install_traffic_keys(
        &mut self,
        cipher_suite: CipherSuite,
        read_secret: Vec<u8>,
        write_secret: Vec<u8>,
    ) -> io::Result<()> {
        let read = RecordCipher::from_secret(cipher_suite, &read_secret)?;
        let write = RecordCipher::from_secret(cipher_suite, &write_secret)?;
        self.traffic = Some(TrafficKeys {
            cipher_suite,
            read_secret,
            write_secret,
            read,
            write,
        });
        Ok(())
    }

    pub fn received_close_notify(&self) -> bool {
        self.received_close_notify
    }

    pub fn io_state(&self) -> Tls13IoState {
        Tls13IoState::new(self.plaintext_read_buf.len())
    }

    /// Decrypt every complete application-phase record in the buffer.
    pub fn process_application_records(&mut self) -> io::Result<()> {
        while !self.received_close_notify {
            let Some((header, payload)) = self.next_record()? else {
                break;
            };
            match header[0] {
                CONTENT_TYPE_CHANGE_CIPHER_SPEC => continue,
                CONTENT_TYPE_APPLICATION_DATA => {}
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected record type 0x{:02x} after handshake", other),
                    ));
                }
            }
            let traffic = self.traffic.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "traffic keys not installed")
            })?;
            let (content_type, plaintext) = traffic.read.open_record(&header, &payload)?;
            match content_type {
                CONTENT_TYPE_APPLICATION_DATA => {
                    self.plaintext_read_buf.extend_from_slice(&plaintext);
                }
                CONTENT_TYPE_ALERT => {
                    if plaintext.len() < 2 {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated alert"));
                    }
                    let (level, description) = (plaintext[0], plaintext[1]);
                    if description == ALERT_DESC_CLOSE_NOTIFY {
                        log::debug!("{}: received close_notify", self.role);
                        self.received_close_notify = true;
                    } else if level == ALERT_LEVEL_WARNING {
                        log::debug!("{}: ignoring warning alert {}", self.role, description);
                    } else {
                        return Err(alert_error(level, description));
                    }
                }
                CONTENT_TYPE_HANDSHAKE => {
                    self.post_handshake_buf.extend_from_slice(&plaintext);
                    while let Some(message) = take_handshake_message(&mut self.post_handshake_buf)? {
                        self.process_post_handshake_message(&message)?;
                    }
                }
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected inner content type 0x{:02x}", other),
                    ));
                }
            }
        }
        Ok(())
    }

    fn process_post_handshake_message(&mut self, message: &[u8]) -> io::Result<()> {
        match message[0] {
            HANDSHAKE_TYPE_NEW_SESSION_TICKET => {
                log::trace!("{}: ignoring NewSessionTicket", self.role);
                Ok(())
            }
            HANDSHAKE_TYPE_KEY_UPDATE => {
                if message.len() != 5 || message[4] > 1 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed KeyUpdate"));
                }
                let update_requested = message[4] == 1;
                self.update_read_key()?;
                if update_requested && !self.sent_close_notify {
                    self.send_key_update()?;
                }
                Ok(())
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected post-handshake message type {}", other),
            )),
        }
    }

    fn update_read_key(&mut self) -> io::Result<()> {
        let traffic = self.traffic.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "traffic keys not installed")
        })?;
        let cs = traffic.cipher_suite;
        traffic.read_secret =
            hkdf_expand_label(cs, &traffic.read_secret, b"traffic upd", b"", cs.hash_len())?;
        traffic.read = RecordCipher::from_secret(cs, &traffic.read_secret)?;
        Ok(())
    }

    /// Send KeyUpdate(update_not_requested) under the current key, then rotate it.
    fn send_key_update(&mut self) -> io::Result<()> {
        self.flush_plaintext()?;
        let traffic = self.traffic.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "traffic keys not installed")
        })?;
        let message = handshake_message(HANDSHAKE_TYPE_KEY_UPDATE, &[0]);
        traffic
            .write
            .seal_record(CONTENT_TYPE_HANDSHAKE, &message, &mut self.ciphertext_write_buf)?;
        let cs = traffic.cipher_suite;
        traffic.write_secret =
            hkdf_expand_label(cs, &traffic.write_secret, b"traffic upd", b"", cs.hash_len())?;
        traffic.write = RecordCipher::from_secret(cs, &traffic.write_secret)?;
        Ok(())
    }

    fn flush_plaintext(&mut self) -> io::Result<()> {
        if self.plaintext_write_buf.is_empty() {
            return Ok(());
        }
        let Some(traffic) = self.traffic.as_mut() else {
            // handshake still running; data stays buffered
            return Ok(());
        };
        traffic.write.seal_record(
            CONTENT_TYPE_APPLICATION_DATA,
            &self.plaintext_write_buf,
            &mut self.ciphertext_write_buf,
        )?;
        self.plaintext_write_buf.clear();
        Ok(())
    }

    pub fn reader(&mut self) -> Tls13Reader<'_> {
        Tls13Reader::new(&mut self.plaintext_read_buf, self.received_close_notify)
    }

    pub fn writer(&mut self) -> Tls13Writer<'_> {
        Tls13Writer::new(&mut self.plaintext_write_buf)
    }

    pub fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        if !self.sent_close_notify {
            self.flush_plaintext()?;
        }
        if self.ciphertext_write_buf.is_empty() {
            return Ok(0);
        }
        let n = wr.write(&self.ciphertext_write_buf)?;
        self.ciphertext_write_buf.drain(..n);
        Ok(n)
    }

    pub fn wants_write(&self) -> bool {
        !self.ciphertext_write_buf.is_empty()
            || (self.traffic.is_some() && !self.plaintext_write_buf.is_empty())
    }

    pub fn wants_read(&self, handshaking: bool) -> bool {
        if self.received_close_notify || self.fatal_error.is_some() {
            return false;
        }
        handshaking || self.plaintext_read_buf.is_empty()
    }

    pub fn send_close_notify(&mut self) {
        if self.sent_close_notify {
            return;
        }
        if let Err(e) = self.flush_plaintext() {
            log::error!("{}: failed to encrypt pending data: {}", self.role, e);
            return;
        }
        let Some(traffic) = self.traffic.as_mut() else {
            log::debug!("{}: cannot send close_notify before handshake completes", self.role);
            return;
        };
        match traffic.write.seal_close_notify(&mut self.ciphertext_write_buf) {
            Ok(()) => self.sent_close_notify = true,
            Err(e) => log::error!("{}: failed to encrypt close_notify: {}", self.role, e),
        }
    }
}
