//! Blocking-style `Read`/`Write` views over an async stream for one poll.
//!
//! `CryptoConnection::read_tls` and `write_tls` take `std::io` traits for both rustls and the
//! hand-rolled TLS 1.3 connections. `Poll::Pending` surfaces as `WouldBlock`, and the waker in
//! `cx` is already registered when it does.
//!
//! Same approach as tokio-rustls:
//! https://github.com/rustls/tokio-rustls/blob/ba767aeb51611107e7cb6aa756f10a2f49e70926/src/common/mod.rs#L403
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

fn pending_to_would_block<T>(poll: Poll<io::Result<T>>) -> io::Result<T> {
    match poll {
        Poll::Ready(result) => result,
        Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
    }
}

pub struct SyncReadAdapter<'a, 'b, T> {
    pub io: &'a mut T,
    pub cx: &'a mut Context<'b>,
}

impl<T: AsyncRead + Unpin> Read for SyncReadAdapter<'_, '_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read_buf = ReadBuf::new(buf);
        pending_to_would_block(Pin::new(&mut self.io).poll_read(self.cx, &mut read_buf))?;
        Ok(read_buf.filled().len())
    }
}

pub struct SyncWriteAdapter<'a, 'b, T> {
    pub io: &'a mut T,
    pub cx: &'a mut Context<'b>,
}

impl<T: AsyncWrite + Unpin> Write for SyncWriteAdapter<'_, '_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        pending_to_would_block(Pin::new(&mut self.io).poll_write(self.cx, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        pending_to_would_block(Pin::new(&mut self.io).poll_flush(self.cx))
    }
}
