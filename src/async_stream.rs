use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream that may be layered on top of another stream.
///
/// Decorators (TLS sessions, the fragmenting writer, ...) return the stream they wrap from
/// `upstream()` so callers can walk down to the raw transport without knowing concrete types.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        None
    }
}

impl AsyncStream for tokio::net::TcpStream {}

impl AsyncStream for tokio::io::DuplexStream {}

#[cfg(unix)]
impl AsyncStream for tokio::net::UnixStream {}

impl<T: ?Sized + AsyncStream> AsyncStream for Box<T> {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        (**self).upstream()
    }
}

impl<T: ?Sized + AsyncStream> AsyncStream for &mut T {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        (**self).upstream()
    }
}

/// Follow `upstream()` until reaching a stream that wraps nothing.
pub fn innermost(stream: &dyn AsyncStream) -> &dyn AsyncStream {
    let mut current = stream;
    while let Some(next) = current.upstream() {
        current = next;
    }
    current
}

/// Number of layers in the chain, counting `stream` itself.
pub fn chain_depth(stream: &dyn AsyncStream) -> usize {
    let mut depth = 1;
    let mut current = stream;
    while let Some(next) = current.upstream() {
        depth += 1;
        current = next;
    }
    depth
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadBuf};

    use super::*;

    struct Layer<S> {
        inner: S,
    }

    impl<S: AsyncStream> AsyncRead for Layer<S> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl<S: AsyncStream> AsyncWrite for Layer<S> {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    impl<S: AsyncStream> AsyncStream for Layer<S> {
        fn upstream(&self) -> Option<&dyn AsyncStream> {
            Some(&self.inner)
        }
    }

    #[test]
    fn test_raw_stream_has_no_upstream() {
        let (a, _b) = tokio::io::duplex(64);
        assert!(a.upstream().is_none());
        assert_eq!(chain_depth(&a), 1);
    }

    #[tokio::test]
    async fn test_walk_chain_to_innermost() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut stream: Box<dyn AsyncStream> = Box::new(Layer {
            inner: Layer { inner: a },
        });
        assert_eq!(chain_depth(stream.as_ref()), 3);

        let inner = innermost(stream.as_ref());
        assert!(inner.upstream().is_none());
        assert_eq!(chain_depth(inner), 1);

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_box_delegates_upstream() {
        let (a, _b) = tokio::io::duplex(64);
        let boxed: Box<Layer<tokio::io::DuplexStream>> = Box::new(Layer { inner: a });
        assert!(boxed.upstream().is_some());
        assert_eq!(chain_depth(&boxed), 2);
    }
}
