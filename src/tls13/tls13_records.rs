// TLS 1.3 record layer protection.
//
// Frames plaintext into protected records (content type trailer, 2^14 split,
// outer ApplicationData header) and opens received records.

use std::io::{self, Error, ErrorKind};

use super::common::{
    CONTENT_TYPE_ALERT, CONTENT_TYPE_APPLICATION_DATA, MAX_TLS_CIPHERTEXT_LEN,
    MAX_TLS_PLAINTEXT_LEN, TLS_RECORD_HEADER_SIZE, VERSION_TLS_1_2, increment_seq, record_header,
    strip_content_type_with_padding,
};
use super::tls13_aead::{AEAD_TAG_LEN, AeadKey};
use super::tls13_cipher_suite::CipherSuite;
use super::tls13_keys::derive_traffic_keys;

/// One direction of record protection: key, static IV and sequence number.
pub struct RecordCipher {
    key: AeadKey,
    iv: Vec<u8>,
    seq: u64,
}

impl RecordCipher {
    pub fn new(cipher_suite: CipherSuite, key: &[u8], iv: &[u8]) -> io::Result<Self> {
        Ok(Self {
            key: AeadKey::new(cipher_suite, key)?,
            iv: iv.to_vec(),
            seq: 0,
        })
    }

    /// Build a cipher directly from a traffic secret.
    pub fn from_secret(cipher_suite: CipherSuite, traffic_secret: &[u8]) -> io::Result<Self> {
        let (key, iv) = derive_traffic_keys(cipher_suite, traffic_secret)?;
        Self::new(cipher_suite, &key, &iv)
    }

    /// Protect `data` of the given inner content type, appending one or more
    /// records to `out`.
    pub fn seal_record(&mut self, content_type: u8, data: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        if data.is_empty() && content_type == CONTENT_TYPE_APPLICATION_DATA {
            return Ok(());
        }
        if data.is_empty() {
            return self.seal_single(content_type, data, out);
        }
        for chunk in data.chunks(MAX_TLS_PLAINTEXT_LEN) {
            self.seal_single(content_type, chunk, out)?;
        }
        Ok(())
    }

    pub fn seal_close_notify(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        self.seal_single(CONTENT_TYPE_ALERT, &[0x01, 0x00], out)
    }

    fn seal_single(&mut self, content_type: u8, chunk: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let mut buf = Vec::with_capacity(chunk.len() + 1 + AEAD_TAG_LEN);
        buf.extend_from_slice(chunk);
        buf.push(content_type);

        let ciphertext_len = buf.len() + AEAD_TAG_LEN;
        let header = record_header(CONTENT_TYPE_APPLICATION_DATA, VERSION_TLS_1_2, ciphertext_len);

        self.key.seal_in_place(&mut buf, &self.iv, self.seq, &header)?;
        increment_seq(&mut self.seq)?;

        out.reserve(TLS_RECORD_HEADER_SIZE + buf.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&buf);
        Ok(())
    }

    /// Open one protected record. `header` is the 5-byte record header used as AAD
    /// and `payload` the ciphertext with tag. Returns the inner content type and
    /// the content with padding removed.
    pub fn open_record(
        &mut self,
        header: &[u8; TLS_RECORD_HEADER_SIZE],
        payload: &[u8],
    ) -> io::Result<(u8, Vec<u8>)> {
        if payload.len() > MAX_TLS_CIPHERTEXT_LEN {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("record overflow: {} bytes", payload.len()),
            ));
        }
        if payload.len() < AEAD_TAG_LEN {
            return Err(Error::new(ErrorKind::InvalidData, "record shorter than tag"));
        }
        let mut buf = payload.to_vec();
        let plaintext_len = self
            .key
            .open_in_place(&mut buf, &self.iv, self.seq, header)?
            .len();
        increment_seq(&mut self.seq)?;
        buf.truncate(plaintext_len);
        let content_type = strip_content_type_with_padding(&mut buf)?;
        Ok((content_type, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls13::common::CONTENT_TYPE_HANDSHAKE;

    const CS: CipherSuite = CipherSuite::AES_128_GCM_SHA256;

    fn pair() -> (RecordCipher, RecordCipher) {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 12];
        (
            RecordCipher::new(CS, &key, &iv).unwrap(),
            RecordCipher::new(CS, &key, &iv).unwrap(),
        )
    }

    fn open_all(reader: &mut RecordCipher, mut wire: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        while !wire.is_empty() {
            let len = u16::from_be_bytes([wire[3], wire[4]]) as usize;
            let header: [u8; 5] = wire[..5].try_into().unwrap();
            out.push(reader.open_record(&header, &wire[5..5 + len]).unwrap());
            wire = &wire[5 + len..];
        }
        out
    }

    #[test]
    fn test_seal_open_single_record() {
        let (mut writer, mut reader) = pair();
        let mut wire = Vec::new();
        writer
            .seal_record(CONTENT_TYPE_APPLICATION_DATA, b"hello", &mut wire)
            .unwrap();
        assert_eq!(wire[0], CONTENT_TYPE_APPLICATION_DATA);
        assert_eq!(&wire[1..3], &[0x03, 0x03]);
        assert_eq!(wire.len(), 5 + 5 + 1 + 16);
        let records = open_all(&mut reader, &wire);
        assert_eq!(records, vec![(CONTENT_TYPE_APPLICATION_DATA, b"hello".to_vec())]);
        assert_eq!(writer.seq, 1);
        assert_eq!(reader.seq, 1);
    }

    #[test]
    fn test_large_data_split_at_record_limit() {
        let (mut writer, mut reader) = pair();
        let data = vec![0xABu8; MAX_TLS_PLAINTEXT_LEN * 2 + 100];
        let mut wire = Vec::new();
        writer
            .seal_record(CONTENT_TYPE_APPLICATION_DATA, &data, &mut wire)
            .unwrap();
        let records = open_all(&mut reader, &wire);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].1.len(), MAX_TLS_PLAINTEXT_LEN);
        assert_eq!(records[2].1.len(), 100);
        let joined: Vec<u8> = records.into_iter().flat_map(|(_, d)| d).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_inner_content_type_preserved() {
        let (mut writer, mut reader) = pair();
        let mut wire = Vec::new();
        writer
            .seal_record(CONTENT_TYPE_HANDSHAKE, &[20, 0, 0, 1, 0xff], &mut wire)
            .unwrap();
        writer.seal_close_notify(&mut wire).unwrap();
        let records = open_all(&mut reader, &wire);
        assert_eq!(records[0], (CONTENT_TYPE_HANDSHAKE, vec![20, 0, 0, 1, 0xff]));
        assert_eq!(records[1], (CONTENT_TYPE_ALERT, vec![0x01, 0x00]));
    }

    #[test]
    fn test_tampered_record_rejected() {
        let (mut writer, mut reader) = pair();
        let mut wire = Vec::new();
        writer
            .seal_record(CONTENT_TYPE_APPLICATION_DATA, b"payload", &mut wire)
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let header: [u8; 5] = wire[..5].try_into().unwrap();
        let err = reader.open_record(&header, &wire[5..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_empty_application_data_emits_nothing() {
        let (mut writer, _) = pair();
        let mut wire = Vec::new();
        writer
            .seal_record(CONTENT_TYPE_APPLICATION_DATA, &[], &mut wire)
            .unwrap();
        assert!(wire.is_empty());
        assert_eq!(writer.seq, 0);
    }
}
