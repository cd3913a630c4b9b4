// Reader and Writer types for crypto connections
//
// These types provide a consistent API for reading decrypted plaintext
// and writing plaintext to be encrypted, working with both rustls and the
// hand-rolled TLS 1.3 connections.

use std::io::{self, BufRead, Read, Write};

use crate::tls13::{Tls13Reader, Tls13Writer};

/// Unified reader that works with rustls and hand-rolled TLS 1.3 connections
pub enum CryptoReader<'a> {
    Rustls(rustls::Reader<'a>),
    Tls13(Tls13Reader<'a>),
}

impl<'a> Read for CryptoReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CryptoReader::Rustls(reader) => reader.read(buf),
            CryptoReader::Tls13(reader) => reader.read(buf),
        }
    }
}

impl<'a> BufRead for CryptoReader<'a> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            CryptoReader::Rustls(reader) => reader.fill_buf(),
            CryptoReader::Tls13(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            CryptoReader::Rustls(reader) => reader.consume(amt),
            CryptoReader::Tls13(reader) => reader.consume(amt),
        }
    }
}

/// Unified writer that works with rustls and hand-rolled TLS 1.3 connections
pub enum CryptoWriter<'a> {
    Rustls(rustls::Writer<'a>),
    Tls13(Tls13Writer<'a>),
}

impl<'a> Write for CryptoWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CryptoWriter::Rustls(writer) => writer.write(buf),
            CryptoWriter::Tls13(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CryptoWriter::Rustls(writer) => writer.flush(),
            CryptoWriter::Tls13(writer) => writer.flush(),
        }
    }
}
