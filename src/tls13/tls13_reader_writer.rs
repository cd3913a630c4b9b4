use std::io::{BufRead, Read, Write};

use bytes::{Buf, BytesMut};

/// Reader over the decrypted plaintext of a hand-rolled TLS 1.3 connection.
///
/// Mirrors rustls::Reader for fill_buf():
/// - Ok(data) when data is available
/// - Ok(&[]) when close_notify was received (clean EOF)
/// - Err(WouldBlock) when no data is buffered and the connection is still open
pub struct Tls13Reader<'a> {
    buffer: &'a mut BytesMut,
    received_close_notify: bool,
}

impl<'a> Tls13Reader<'a> {
    pub fn new(buffer: &'a mut BytesMut, received_close_notify: bool) -> Self {
        Tls13Reader {
            buffer,
            received_close_notify,
        }
    }
}

impl Read for Tls13Reader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let to_read = buf.len().min(self.buffer.len());
        if to_read > 0 {
            buf[..to_read].copy_from_slice(&self.buffer[..to_read]);
            self.buffer.advance(to_read);
        }
        Ok(to_read)
    }
}

impl BufRead for Tls13Reader<'_> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if !self.buffer.is_empty() {
            Ok(&self.buffer[..])
        } else if self.received_close_notify {
            Ok(&[])
        } else {
            Err(std::io::ErrorKind::WouldBlock.into())
        }
    }

    fn consume(&mut self, amt: usize) {
        let actual = amt.min(self.buffer.len());
        self.buffer.advance(actual);
    }
}

/// Writer buffering plaintext until the next write_tls() call encrypts it.
pub struct Tls13Writer<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Tls13Writer<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Tls13Writer { buffer }
    }
}

impl Write for Tls13Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_consumes_in_order() {
        let mut buffer = BytesMut::from(&b"hello world"[..]);
        {
            let mut reader = Tls13Reader::new(&mut buffer, false);
            let mut buf = [0u8; 5];
            assert_eq!(reader.read(&mut buf).unwrap(), 5);
            assert_eq!(&buf, b"hello");
        }
        assert_eq!(&buffer[..], b" world");
    }

    #[test]
    fn test_reader_bufread_consume() {
        let mut buffer = BytesMut::from(&b"test data"[..]);
        let mut reader = Tls13Reader::new(&mut buffer, false);
        assert_eq!(reader.fill_buf().unwrap(), b"test data");
        reader.consume(5);
        assert_eq!(reader.fill_buf().unwrap(), b"data");
        reader.consume(100);
        assert_eq!(
            reader.fill_buf().unwrap_err().kind(),
            std::io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_reader_close_notify_is_eof() {
        let mut buffer = BytesMut::new();
        let mut reader = Tls13Reader::new(&mut buffer, true);
        assert!(reader.fill_buf().unwrap().is_empty());
    }

    #[test]
    fn test_writer_appends() {
        let mut buffer = Vec::new();
        let mut writer = Tls13Writer::new(&mut buffer);
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        assert_eq!(writer.write(b" world").unwrap(), 6);
        assert_eq!(buffer.as_slice(), b"hello world");
    }
}
