//! In-memory `Conn`/`Listener`/`Dialer` test doubles.
//!
//! Every `netx` wrapper crate exercises its pipeline against these doubles
//! in its dev-dependencies rather than against a real TCP/UDP socket, so the
//! test suite never depends on host networking. This is ambient test
//! tooling only; production code never references this module outside
//! `#[cfg(test)]`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use crate::pipe::{BufConn, Conn, Dialer, Listener, MaxWrite, Tag, TaggedConn};
use crate::{Deadlines, Error, Result};

/// A `Conn` backed by one half of an in-memory duplex pipe, preserving
/// message boundaries the way a datagram transport would: each `write`
/// call's bytes are read back by one or more `read` calls, but two writes
/// are never coalesced into a single read unless the caller's buffer is
/// smaller than the write. This is the common double for both byte-stream
/// tests (Framed) and datagram tests (AES-GCM, Demux, DNS tunnel).
pub struct DuplexConn {
    stream: DuplexStream,
    deadlines: Deadlines,
    closed: bool,
}

impl DuplexConn {
    /// Creates a connected pair of in-memory `Conn`s with the given
    /// internal buffer capacity.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (Self::new(a), Self::new(b))
    }

    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            deadlines: Deadlines::new(),
            closed: false,
        }
    }
}

#[async_trait::async_trait]
impl Conn for DuplexConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        let n = self
            .deadlines
            .race_read(self.stream.read(buf))
            .await??;
        if n == 0 && !buf.is_empty() {
            return Err(Error::Eof);
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        let n = self
            .deadlines
            .race_write(self.stream.write(buf))
            .await??;
        if n < buf.len() {
            return Err(Error::ShortWrite {
                wrote: n,
                expected: buf.len(),
            });
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.overall.set(when);
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.read.set(when);
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.write.set(when);
    }

    fn as_buf_conn(&mut self) -> Option<&mut dyn BufConn> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl BufConn for DuplexConn {
    async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await.map_err(Error::Io)
    }
}

/// An in-memory `Listener`/`Dialer` pair: each `dial()` call manufactures a
/// fresh [`DuplexConn`] pair, handing one half to whatever is calling
/// `accept()` on the matching listener.
pub struct InMemoryListener {
    rx: mpsc::Receiver<DuplexConn>,
}

/// The dialing half of an [`InMemoryListener`].
#[derive(Clone)]
pub struct InMemoryDialer {
    tx: mpsc::Sender<DuplexConn>,
    capacity: usize,
}

/// Creates a connected `Listener`/`Dialer` pair.
pub fn in_memory_pair(backlog: usize, buffer_capacity: usize) -> (InMemoryListener, InMemoryDialer) {
    let (tx, rx) = mpsc::channel(backlog.max(1));
    (
        InMemoryListener { rx },
        InMemoryDialer {
            tx,
            capacity: buffer_capacity,
        },
    )
}

#[async_trait::async_trait]
impl Listener for InMemoryListener {
    async fn accept(&mut self) -> Result<Box<dyn Conn>> {
        self.rx.recv().await.map(|c| Box::new(c) as Box<dyn Conn>).ok_or(Error::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

#[async_trait::async_trait]
impl Dialer for InMemoryDialer {
    async fn dial(&self) -> Result<Box<dyn Conn>> {
        let (local, remote) = DuplexConn::pair(self.capacity);
        self.tx
            .send(remote)
            .await
            .map_err(|_| Error::Closed)?;
        Ok(Box::new(local))
    }
}

/// A `Conn` that preserves message boundaries the way a datagram transport
/// (UDP, ICMP) does: each `write` enqueues exactly one packet, including a
/// zero-length one, and each `read` dequeues exactly one packet, truncating
/// (discarding the remainder, mirroring `recvfrom(2)`) if the caller's
/// buffer is smaller. Used by the AES-GCM, Demux, and DNS tunnel codec
/// tests, which all require a zero-length write to surface as a distinct
/// successful zero-byte read rather than being indistinguishable from EOF.
pub struct PacketConn {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    deadlines: Deadlines,
    closed: bool,
}

impl PacketConn {
    /// Creates a connected pair of packet-preserving in-memory `Conn`s.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(capacity.max(1));
        let (tx_b, rx_b) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: tx_a,
                rx: rx_b,
                deadlines: Deadlines::new(),
                closed: false,
            },
            Self {
                tx: tx_b,
                rx: rx_a,
                deadlines: Deadlines::new(),
                closed: false,
            },
        )
    }
}

#[async_trait::async_trait]
impl Conn for PacketConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        let packet = self
            .deadlines
            .race_read(self.rx.recv())
            .await?
            .ok_or(Error::Eof)?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.deadlines
            .race_write(self.tx.send(buf.to_vec()))
            .await?
            .map_err(|_| Error::Closed)?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rx.close();
        Ok(())
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.overall.set(when);
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.read.set(when);
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.write.set(when);
    }
}

/// A [`TaggedConn`] double wrapping a [`PacketConn`], for `netx-demux`'s
/// `TaggedDemux` tests and anything else exercising a tag-bearing transport
/// without a real DNS/Mux layer underneath. By default every read is tagged
/// [`Tag::None`] and no `MaxWrite` is advertised; `tagging`/`with_max_write`
/// override either for tests that need to observe tag pairing or `MaxWrite`
/// composition.
pub struct TaggedPacketConn {
    inner: PacketConn,
    next_tag: usize,
    tag_for: Box<dyn FnMut(usize) -> Tag + Send>,
    max_write: MaxWrite,
    written_tags: Option<Arc<Mutex<Vec<Tag>>>>,
}

impl TaggedPacketConn {
    /// Wraps `inner`, tagging every read `Tag::None`.
    pub fn new(inner: PacketConn) -> Self {
        Self {
            inner,
            next_tag: 0,
            tag_for: Box::new(|_| Tag::None),
            max_write: 0,
            written_tags: None,
        }
    }

    /// Wraps `inner`, tagging the `n`th read (zero-indexed) with
    /// `tag_for(n)`.
    pub fn tagging(inner: PacketConn, tag_for: impl FnMut(usize) -> Tag + Send + 'static) -> Self {
        Self {
            inner,
            next_tag: 0,
            tag_for: Box::new(tag_for),
            max_write: 0,
            written_tags: None,
        }
    }

    /// Wraps `inner`, advertising a fixed `MaxWrite`.
    pub fn with_max_write(inner: PacketConn, max_write: MaxWrite) -> Self {
        Self {
            inner,
            next_tag: 0,
            tag_for: Box::new(|_| Tag::None),
            max_write,
            written_tags: None,
        }
    }

    /// As [`TaggedPacketConn::tagging`], but also records every tag passed
    /// to `write_tagged`, in call order, into the returned handle — lets a
    /// test assert which exact tag a write replayed, not just that some
    /// write happened.
    pub fn recording(
        inner: PacketConn,
        tag_for: impl FnMut(usize) -> Tag + Send + 'static,
    ) -> (Self, Arc<Mutex<Vec<Tag>>>) {
        let written_tags = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                next_tag: 0,
                tag_for: Box::new(tag_for),
                max_write: 0,
                written_tags: Some(written_tags.clone()),
            },
            written_tags,
        )
    }
}

#[async_trait::async_trait]
impl TaggedConn for TaggedPacketConn {
    async fn read_tagged(&mut self, buf: &mut [u8]) -> Result<(usize, Tag)> {
        let n = self.inner.read(buf).await?;
        let seq = self.next_tag;
        self.next_tag += 1;
        Ok((n, (self.tag_for)(seq)))
    }

    async fn write_tagged(&mut self, buf: &[u8], tag: Tag) -> Result<usize> {
        if let Some(log) = &self.written_tags {
            log.lock().unwrap_or_else(|poison| poison.into_inner()).push(tag);
        }
        self.inner.write(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn max_write(&self) -> MaxWrite {
        self.max_write
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_deadline(when);
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_read_deadline(when);
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.inner.set_write_deadline(when);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_conn_round_trips_and_observes_keepalive() {
        let (mut a, mut b) = DuplexConn::pair(256);
        a.write(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn in_memory_listener_accepts_dialed_connections() {
        let (mut listener, dialer) = in_memory_pair(4, 256);
        let client_task = tokio::spawn(async move {
            let mut conn = dialer.dial().await.unwrap();
            conn.write(b"ping").await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = server_conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn packet_conn_preserves_zero_length_writes() {
        let (mut a, mut b) = PacketConn::pair(4);
        a.write(&[]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn packet_conn_truncates_oversized_packets() {
        let (mut a, mut b) = PacketConn::pair(4);
        a.write(b"0123456789").await.unwrap();
        let mut small = [0u8; 4];
        let n = b.read(&mut small).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&small, b"0123");
    }
}
