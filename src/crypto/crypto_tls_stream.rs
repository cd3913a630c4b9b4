//! `AsyncRead`/`AsyncWrite` over a `CryptoConnection` and the transport it runs on.
//!
//! Records move through two helpers: `poll_push_records` drains whatever the session has
//! queued, `poll_pull_records` feeds one batch of ciphertext into it. Reads, writes and
//! shutdown are built from those, so rustls and the hand-rolled TLS 1.3 sessions behave the
//! same way towards the caller.

use std::io::{self, BufRead, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::ready;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::crypto_connection::CryptoConnection;
use crate::async_stream::AsyncStream;
use crate::sync_adapter::{SyncReadAdapter, SyncWriteAdapter};

enum Plaintext {
    Delivered,
    CloseNotify,
    Empty,
}

pub struct CryptoTlsStream<IO> {
    io: IO,
    session: CryptoConnection,
    read_closed: bool,
    write_closed: bool,
    // bytes went to the transport since its last flush
    transport_dirty: bool,
}

impl<IO> CryptoTlsStream<IO>
where
    IO: AsyncStream,
{
    /// Wrap a session whose handshake is complete or will be finished on first use.
    pub fn new(io: IO, session: CryptoConnection) -> Self {
        CryptoTlsStream {
            io,
            session,
            read_closed: false,
            write_closed: false,
            transport_dirty: false,
        }
    }

    pub fn get_ref(&self) -> (&IO, &CryptoConnection) {
        (&self.io, &self.session)
    }

    /// Send close_notify, then keep reading and discarding until the peer closes or `linger`
    /// runs out.
    ///
    /// Post-handshake records such as session tickets are consumed instead of being left unread
    /// in the socket, so the transport closes with a FIN rather than a reset.
    pub async fn close_and_drain(&mut self, linger: Duration) -> io::Result<()> {
        self.shutdown().await?;
        let mut scratch = [0u8; 4096];
        let drain = async {
            while self.read(&mut scratch).await? > 0 {}
            Ok::<_, io::Error>(())
        };
        match tokio::time::timeout(linger, drain).await {
            Ok(result) => result,
            Err(_) => {
                log::debug!("peer kept the session open for {:?} after close_notify", linger);
                Ok(())
            }
        }
    }

    fn poll_push_records(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.session.wants_write() {
            let mut writer = SyncWriteAdapter {
                io: &mut self.io,
                cx,
            };
            match self.session.write_tls(&mut writer) {
                Ok(0) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Ok(_) => self.transport_dirty = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Poll::Pending,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
        Poll::Ready(Ok(()))
    }

    /// Returns false on transport EOF.
    fn poll_pull_records(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<bool>> {
        let mut reader = SyncReadAdapter {
            io: &mut self.io,
            cx,
        };
        match self.session.read_tls(&mut reader) {
            Ok(0) => Poll::Ready(Ok(false)),
            Ok(_) => {
                if let Err(e) = self.session.process_new_packets() {
                    // best effort: get any alert the session queued onto the wire
                    let _ = self.poll_push_records(cx);
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(Ok(true))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.session.is_handshaking() {
            ready!(self.poll_push_records(cx))?;
            if !ready!(self.poll_pull_records(cx))? {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF during handshake",
                )));
            }
        }
        Poll::Ready(Ok(()))
    }

    fn take_plaintext(&mut self, buf: &mut ReadBuf<'_>) -> io::Result<Plaintext> {
        let mut reader = self.session.reader();
        match reader.fill_buf() {
            // both session kinds only report an empty buffer after close_notify
            Ok([]) => Ok(Plaintext::CloseNotify),
            Ok(available) => {
                let len = buf.remaining().min(available.len());
                buf.put_slice(&available[..len]);
                reader.consume(len);
                Ok(Plaintext::Delivered)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Plaintext::Empty),
            Err(e) => Err(e),
        }
    }
}

impl<IO> AsyncRead for CryptoTlsStream<IO>
where
    IO: AsyncStream,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.read_closed {
            return Poll::Ready(Ok(()));
        }
        ready!(this.poll_handshake(cx))?;

        loop {
            match this.take_plaintext(buf) {
                Ok(Plaintext::Delivered) => return Poll::Ready(Ok(())),
                Ok(Plaintext::CloseNotify) => {
                    this.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Ok(Plaintext::Empty) => {}
                Err(e) => {
                    if e.kind() == io::ErrorKind::ConnectionAborted {
                        this.read_closed = true;
                    }
                    return Poll::Ready(Err(e));
                }
            }

            if !this.session.wants_read() {
                // nothing buffered yet the session declines input; retry on the next poll
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            if !ready!(this.poll_pull_records(cx))? {
                // transport closed without close_notify, accepted as EOF like most HTTPS peers
                this.read_closed = true;
                return Poll::Ready(Ok(()));
            }
        }
    }
}

impl<IO> AsyncWrite for CryptoTlsStream<IO>
where
    IO: AsyncStream,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write side is shut down",
            )));
        }
        ready!(this.poll_handshake(cx))?;

        // backpressure: take no new plaintext while earlier records are still queued
        ready!(this.poll_push_records(cx))?;
        let written = this.session.writer().write(buf)?;
        if let Poll::Ready(Err(e)) = this.poll_push_records(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.session.writer().flush()?;
        ready!(this.poll_push_records(cx))?;
        if this.transport_dirty {
            ready!(Pin::new(&mut this.io).poll_flush(cx))?;
            this.transport_dirty = false;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // the hand-rolled sessions encrypt lazily in write_tls, so application data goes out
        // before close_notify is queued behind it
        ready!(this.poll_push_records(cx))?;
        if !this.write_closed {
            this.session.send_close_notify();
            this.write_closed = true;
        }
        ready!(this.poll_push_records(cx))?;

        match ready!(Pin::new(&mut this.io).poll_shutdown(cx)) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Poll::Ready(Ok(())),
            result => Poll::Ready(result),
        }
    }
}

impl<IO> AsyncStream for CryptoTlsStream<IO>
where
    IO: AsyncStream,
{
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        Some(&self.io)
    }
}
