//! Split the first TLS handshake record written to a connection into several smaller records.
//!
//! Middleboxes that match on a contiguous ClientHello see a run of short handshake records
//! instead, optionally spaced out by random delays. Only the first write is inspected; everything
//! after it passes through untouched.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::async_stream::AsyncStream;
use crate::tls13::{CONTENT_TYPE_HANDSHAKE, TLS_RECORD_HEADER_SIZE};

/// An inclusive `[min, max]` range, always stored with `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRange {
    min: u64,
    max: u64,
}

impl FragmentRange {
    pub fn new(a: u64, b: u64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// Parse `"a-b"` or `"a"`. Inverted bounds are swapped.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        match input.split_once('-') {
            Some((a, b)) => {
                let a = a.trim().parse::<u64>().ok()?;
                let b = b.trim().parse::<u64>().ok()?;
                Some(Self::new(a, b))
            }
            None => {
                let value = input.parse::<u64>().ok()?;
                Some(Self::new(value, value))
            }
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// A uniformly random value in the range.
    pub fn sample(&self) -> u64 {
        if self.is_fixed() {
            self.min
        } else {
            rand::rng().random_range(self.min..=self.max)
        }
    }
}

impl std::fmt::Display for FragmentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Fragment sizes in bytes and inter-fragment delays in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentConfig {
    pub length: FragmentRange,
    pub interval: FragmentRange,
}

impl FragmentConfig {
    pub fn new(length: &str, interval: &str) -> std::io::Result<Self> {
        let length_range = FragmentRange::parse(length)
            .filter(|range| range.min() > 0 && range.max() <= u16::MAX as u64)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid fragment length: {length}"),
                )
            })?;
        let interval_range = FragmentRange::parse(interval).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid fragment interval: {interval}"),
            )
        })?;
        Ok(Self {
            length: length_range,
            interval: interval_range,
        })
    }

    fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.interval.sample())
    }
}

/// Cut `payload_len` bytes into consecutive `(offset, len)` slices with lengths drawn from
/// `range`. The last slice is clamped to end exactly at `payload_len`.
pub fn plan_fragments(payload_len: usize, range: &FragmentRange) -> Vec<(usize, usize)> {
    let mut plan = Vec::new();
    let mut offset = 0;
    while offset < payload_len {
        let len = (range.sample().max(1) as usize).min(payload_len - offset);
        plan.push((offset, len));
        offset += len;
    }
    plan
}

/// Length of the complete handshake record at the start of `buf`, if there is one.
fn leading_handshake_record(buf: &[u8]) -> Option<usize> {
    if buf.len() < TLS_RECORD_HEADER_SIZE || buf[0] != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    let payload_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let record_len = TLS_RECORD_HEADER_SIZE + payload_len;
    if payload_len == 0 || buf.len() < record_len {
        return None;
    }
    Some(record_len)
}

fn fragment_record(record: &[u8], length: &FragmentRange) -> VecDeque<Vec<u8>> {
    let (header, payload) = record.split_at(TLS_RECORD_HEADER_SIZE);
    plan_fragments(payload.len(), length)
        .into_iter()
        .map(|(offset, len)| {
            let mut frame = Vec::with_capacity(TLS_RECORD_HEADER_SIZE + len);
            frame.push(CONTENT_TYPE_HANDSHAKE);
            frame.extend_from_slice(&header[1..3]);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
            frame.extend_from_slice(&payload[offset..offset + len]);
            frame
        })
        .collect()
}

enum WriteState {
    /// Nothing written yet.
    Initial,
    Fragmenting {
        frames: VecDeque<Vec<u8>>,
        current: Vec<u8>,
        pos: usize,
        delay: Option<Pin<Box<Sleep>>>,
        record_len: usize,
    },
    Passthrough,
    Failed,
}

pub struct FragmentedClientHelloStream<S> {
    inner: S,
    config: FragmentConfig,
    state: WriteState,
}

impl<S> FragmentedClientHelloStream<S> {
    pub fn new(inner: S, config: FragmentConfig) -> Self {
        Self {
            inner,
            config,
            state: WriteState::Initial,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FragmentedClientHelloStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> FragmentedClientHelloStream<S> {
    fn poll_fragments(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<usize>> {
        loop {
            let WriteState::Fragmenting {
                frames,
                current,
                pos,
                delay,
                record_len,
            } = &mut self.state
            else {
                return Poll::Ready(Err(std::io::Error::other("not fragmenting")));
            };

            if let Some(sleep) = delay.as_mut() {
                if sleep.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                *delay = None;
            }

            while *pos < current.len() {
                match Pin::new(&mut self.inner).poll_write(cx, &current[*pos..]) {
                    Poll::Ready(Ok(0)) => {
                        self.state = WriteState::Failed;
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "failed to write handshake fragment",
                        )));
                    }
                    Poll::Ready(Ok(n)) => *pos += n,
                    Poll::Ready(Err(e)) => {
                        self.state = WriteState::Failed;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            match frames.pop_front() {
                Some(next) => {
                    *current = next;
                    *pos = 0;
                    let duration = self.config.sample_delay();
                    if !duration.is_zero() {
                        *delay = Some(Box::pin(tokio::time::sleep(duration)));
                    }
                }
                None => {
                    let written = *record_len;
                    self.state = WriteState::Passthrough;
                    return Poll::Ready(Ok(written));
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FragmentedClientHelloStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match this.state {
            WriteState::Initial => {
                let Some(record_len) = leading_handshake_record(buf) else {
                    this.state = WriteState::Passthrough;
                    return Pin::new(&mut this.inner).poll_write(cx, buf);
                };
                log::info!(
                    "Sending fragmented TLS client hello: {}",
                    record_len - TLS_RECORD_HEADER_SIZE
                );
                let mut frames = fragment_record(&buf[..record_len], &this.config.length);
                let current = frames.pop_front().unwrap_or_default();
                this.state = WriteState::Fragmenting {
                    frames,
                    current,
                    pos: 0,
                    delay: None,
                    record_len,
                };
                this.poll_fragments(cx)
            }
            WriteState::Fragmenting { .. } => this.poll_fragments(cx),
            WriteState::Passthrough => Pin::new(&mut this.inner).poll_write(cx, buf),
            WriteState::Failed => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "fragmented ClientHello write was aborted",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if matches!(this.state, WriteState::Fragmenting { .. }) {
            match this.poll_fragments(cx) {
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncStream> AsyncStream for FragmentedClientHelloStream<S> {
    fn upstream(&self) -> Option<&dyn AsyncStream> {
        Some(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn handshake_record(version: u16, payload_len: usize) -> Vec<u8> {
        let mut record = vec![CONTENT_TYPE_HANDSHAKE];
        record.extend_from_slice(&version.to_be_bytes());
        record.extend_from_slice(&(payload_len as u16).to_be_bytes());
        record.extend((0..payload_len).map(|i| (i % 251) as u8));
        record
    }

    /// Split raw bytes into (content type, version, payload) records.
    fn split_records(mut data: &[u8]) -> Vec<(u8, u16, Vec<u8>)> {
        let mut records = Vec::new();
        while !data.is_empty() {
            let len = u16::from_be_bytes([data[3], data[4]]) as usize;
            records.push((
                data[0],
                u16::from_be_bytes([data[1], data[2]]),
                data[5..5 + len].to_vec(),
            ));
            data = &data[5 + len..];
        }
        records
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(FragmentRange::parse("10-50"), Some(FragmentRange::new(10, 50)));
        assert_eq!(FragmentRange::parse("7"), Some(FragmentRange::new(7, 7)));
        assert_eq!(FragmentRange::parse(" 3 - 4 "), Some(FragmentRange::new(3, 4)));
        assert_eq!(FragmentRange::parse(""), None);
        assert_eq!(FragmentRange::parse("a-b"), None);
        assert_eq!(FragmentRange::parse("1-2-3"), None);
        assert_eq!(FragmentRange::parse("-5"), None);
    }

    #[test]
    fn test_inverted_range_is_normalized() {
        let range = FragmentRange::parse("50-10").unwrap();
        assert_eq!(range, FragmentRange::parse("10-50").unwrap());
        assert_eq!((range.min(), range.max()), (10, 50));
        for _ in 0..100 {
            let value = range.sample();
            assert!((10..=50).contains(&value));
        }
        assert_eq!(range.to_string(), "10-50");
    }

    #[test]
    fn test_fixed_range_sample() {
        let range = FragmentRange::new(9, 9);
        assert!(range.is_fixed());
        assert_eq!(range.sample(), 9);
    }

    #[test]
    fn test_config_errors() {
        let err = FragmentConfig::new("", "0").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "invalid fragment length: ");

        let err = FragmentConfig::new("0-5", "0").unwrap_err();
        assert_eq!(err.to_string(), "invalid fragment length: 0-5");

        let err = FragmentConfig::new("1-5", "x").unwrap_err();
        assert_eq!(err.to_string(), "invalid fragment interval: x");

        let config = FragmentConfig::new("100-200", "50-10").unwrap();
        assert_eq!(config.interval, FragmentRange::new(10, 50));
    }

    #[test]
    fn test_plan_covers_payload() {
        let plan = plan_fragments(517, &FragmentRange::new(100, 100));
        assert_eq!(plan.len(), 6);
        assert_eq!(plan[0], (0, 100));
        assert_eq!(plan[5], (500, 17));

        let plan = plan_fragments(1000, &FragmentRange::new(1, 64));
        let mut expected_offset = 0;
        for (offset, len) in &plan {
            assert_eq!(*offset, expected_offset);
            assert!((1..=64).contains(len));
            expected_offset += len;
        }
        assert_eq!(expected_offset, 1000);
        assert!(plan_fragments(0, &FragmentRange::new(1, 1)).is_empty());
    }

    #[tokio::test]
    async fn test_single_byte_fragments() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("1-1", "0-0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        let record = handshake_record(0x0301, 517);
        let n = stream.write(&record).await.unwrap();
        assert_eq!(n, record.len());
        stream.flush().await.unwrap();
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        assert_eq!(written.len(), 517 + 5 * 517);

        let records = split_records(&written);
        assert_eq!(records.len(), 517);
        assert!(records.iter().all(|(t, v, p)| *t == 22 && *v == 0x0301 && p.len() == 1));
        let payload: Vec<u8> = records.into_iter().flat_map(|(_, _, p)| p).collect();
        assert_eq!(payload, record[5..]);
    }

    #[tokio::test]
    async fn test_fixed_length_fragment_count() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("64", "0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        let record = handshake_record(0x0303, 300);
        stream.write_all(&record).await.unwrap();
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        let records = split_records(&written);
        // ceil(300 / 64)
        assert_eq!(records.len(), 5);
        assert_eq!(written.len(), 300 + 5 * records.len());
        let payload: Vec<u8> = records.into_iter().flat_map(|(_, _, p)| p).collect();
        assert_eq!(payload, record[5..]);
    }

    #[tokio::test]
    async fn test_only_first_write_is_fragmented() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("10", "0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        let first = handshake_record(0x0301, 40);
        let second = handshake_record(0x0303, 40);
        stream.write_all(&first).await.unwrap();
        stream.write_all(&second).await.unwrap();
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        let records = split_records(&written);
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].2.len(), 40);
    }

    #[tokio::test]
    async fn test_non_handshake_first_write_passes_through() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("1", "0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        stream.write_all(&handshake_record(0x0301, 20)).await.unwrap();
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        assert_eq!(&written[..18], b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(written.len(), 18 + 25);
    }

    #[tokio::test]
    async fn test_trailing_bytes_after_record_are_written_after_fragments() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("4", "0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        let mut data = handshake_record(0x0301, 8);
        data.extend_from_slice(&[0x14, 0x03, 0x03, 0x00, 0x01, 0x01]);
        stream.write_all(&data).await.unwrap();
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        let records = split_records(&written);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].0, 0x14);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_between_fragments() {
        let (a, mut b) = tokio::io::duplex(1 << 16);
        let config = FragmentConfig::new("10", "25").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        let start = tokio::time::Instant::now();
        stream.write_all(&handshake_record(0x0301, 30)).await.unwrap();
        // three fragments, two gaps
        assert!(start.elapsed() >= Duration::from_millis(50));
        drop(stream);

        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        assert_eq!(split_records(&written).len(), 3);
    }

    #[tokio::test]
    async fn test_write_error_aborts_sequence() {
        let (a, b) = tokio::io::duplex(1 << 16);
        drop(b);
        let config = FragmentConfig::new("1", "0").unwrap();
        let mut stream = FragmentedClientHelloStream::new(a, config);

        assert!(stream.write(&handshake_record(0x0301, 10)).await.is_err());
        let err = stream.write(b"more").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_upstream_is_inner_stream() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = FragmentedClientHelloStream::new(a, FragmentConfig::new("1", "0").unwrap());
        assert!(stream.upstream().is_some());
        assert_eq!(crate::async_stream::chain_depth(&stream), 2);
    }
}
