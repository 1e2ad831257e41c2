//! Framed byte channel over any duplex stream.
//!
//! A stream is split into a [`FrameReader`] owned by the connection's reader
//! task and a [`FrameWriter`] shared behind an async mutex. Both halves speak
//! [`Packet`]s through [`PacketCodec`].

use crate::config::TransportConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument};

/// Anything a connection can run over: TCP, in-memory duplex pipes, etc.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// What the reader saw while waiting for the next frame
#[derive(Debug)]
pub enum ReadEvent {
    Packet(Packet),
    /// No frame within the idle timeout
    Idle,
    /// Clean EOF
    Closed,
    Failed(ProtocolError),
}

pub struct FrameReader {
    inner: FramedRead<ReadHalf<BoxedStream>, PacketCodec>,
    idle_timeout: Duration,
}

impl FrameReader {
    pub async fn next_event(&mut self) -> ReadEvent {
        let next = if self.idle_timeout.is_zero() {
            self.inner.next().await
        } else {
            match tokio::time::timeout(self.idle_timeout, self.inner.next()).await {
                Ok(next) => next,
                Err(_) => return ReadEvent::Idle,
            }
        };

        match next {
            Some(Ok(packet)) => ReadEvent::Packet(packet),
            Some(Err(e)) => ReadEvent::Failed(e),
            None => ReadEvent::Closed,
        }
    }
}

pub struct FrameWriter {
    inner: FramedWrite<WriteHalf<BoxedStream>, PacketCodec>,
    write_timeout: Duration,
}

impl FrameWriter {
    /// Write and flush one frame within the write deadline
    pub async fn write(&mut self, packet: Packet) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.inner.send(packet)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Flush and shut down the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.inner.close()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout),
        }
    }
}

/// Split a stream into framed halves configured from `config`
pub fn split<S: AsyncStream>(stream: S, config: &TransportConfig) -> (FrameReader, FrameWriter) {
    let boxed: BoxedStream = Box::new(stream);
    let (read_half, write_half) = tokio::io::split(boxed);
    let codec = PacketCodec::new(config.max_payload_size);

    let reader = FrameReader {
        inner: FramedRead::new(read_half, codec),
        idle_timeout: config.idle_read_timeout,
    };
    let writer = FrameWriter {
        inner: FramedWrite::new(write_half, codec),
        write_timeout: config.write_timeout,
    };
    (reader, writer)
}

/// Dial a TCP endpoint within `timeout`
#[instrument(skip(timeout))]
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => stream?,
        Err(_) => return Err(ProtocolError::Timeout),
    };
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "Dialed");
    Ok(stream)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let config = TransportConfig::default();
        let (_ra, mut wa) = split(a, &config);
        let (mut rb, _wb) = split(b, &config);

        wa.write(Packet::new(3, 5, b"hi".to_vec())).await.unwrap();
        match rb.next_event().await {
            ReadEvent::Packet(p) => assert_eq!(p, Packet::new(3, 5, b"hi".to_vec())),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_is_reported_as_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        let (mut ra, _wa) = split(a, &TransportConfig::default());
        b.shutdown().await.unwrap();
        drop(b);
        assert!(matches!(ra.next_event().await, ReadEvent::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_yields_idle_tick() {
        let (a, _b) = tokio::io::duplex(64);
        let config = TransportConfig {
            idle_read_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let (mut ra, _wa) = split(a, &config);
        assert!(matches!(ra.next_event().await, ReadEvent::Idle));
    }
}
