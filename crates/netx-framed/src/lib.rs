#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-framed` wraps a byte-stream [`Conn`] with a length-prefixed message
//! framing, turning arbitrary read/write boundaries into one `write` call
//! per message and one `read` call per message. It is the `Conn -> Conn`
//! wrapper most pipelines put directly above a raw TCP connection.
//!
//! # Design
//!
//! Each frame is a big-endian length header followed by that many payload
//! bytes: a fixed-width header type kept separate from payload bytes, with
//! header encode/decode kept distinct from the read loop that buffers a
//! not-yet-complete frame across several underlying reads.
//!
//! A write always happens as two underlying `Conn::write` calls (header,
//! then payload) so an underlying [`BufConn`] can coalesce both into one
//! flushed syscall; [`FramedConn::write`] calls [`Conn::as_buf_conn`] and
//! flushes once after both writes land.
//!
//! # Invariants
//!
//! - A zero-length payload is a valid frame (keep-alive), decoded as
//!   `Ok(0)` rather than [`netx_core::Error::Eof`].
//! - A header claiming a length over [`FramedConfig::max_frame_size`] fails
//!   the read with [`netx_core::Error::FrameTooLarge`] without consuming
//!   further bytes from the connection (the caller is expected to close it).
//! - Frame boundaries from multiple underlying reads are buffered
//!   internally; a caller's smaller read buffer never merges or splits two
//!   logical frames.

use std::convert::TryFrom;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;

use netx_core::{BufConn, Conn, Error, Result};

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::FramedDriver;

/// The width of a frame's length header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HeaderWidth {
    /// A 4-byte big-endian `u32` length, the default wire format.
    Four,
    /// A legacy 2-byte big-endian `u16` length, kept for interoperability
    /// with deployments built before the 4-byte header. Frames over 65535
    /// bytes cannot be represented in this mode.
    #[cfg(feature = "legacy-2byte-header")]
    Two,
}

impl HeaderWidth {
    fn len(self) -> usize {
        match self {
            HeaderWidth::Four => 4,
            #[cfg(feature = "legacy-2byte-header")]
            HeaderWidth::Two => 2,
        }
    }

    fn encode(self, len: u32) -> Vec<u8> {
        match self {
            HeaderWidth::Four => len.to_be_bytes().to_vec(),
            #[cfg(feature = "legacy-2byte-header")]
            HeaderWidth::Two => (len as u16).to_be_bytes().to_vec(),
        }
    }

    fn decode(self, bytes: &[u8]) -> u32 {
        match self {
            HeaderWidth::Four => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            #[cfg(feature = "legacy-2byte-header")]
            HeaderWidth::Two => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        }
    }

    fn max_representable(self) -> u32 {
        match self {
            HeaderWidth::Four => u32::MAX,
            #[cfg(feature = "legacy-2byte-header")]
            HeaderWidth::Two => u32::from(u16::MAX),
        }
    }
}

/// Configuration for a [`FramedConn`].
#[derive(Clone, Copy, Debug)]
pub struct FramedConfig {
    max_frame_size: u32,
    header_width: HeaderWidth,
}

impl Default for FramedConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 4096,
            header_width: HeaderWidth::Four,
        }
    }
}

impl FramedConfig {
    /// Starts a builder with the default 4096-byte max frame size and the
    /// 4-byte header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest payload a single frame may carry. Rejected at
    /// construction if it exceeds what the active header width can encode.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Result<Self> {
        if max_frame_size > self.header_width.max_representable() {
            return Err(Error::InvalidConfig(format!(
                "max_frame_size {max_frame_size} exceeds what a {}-byte header can encode",
                self.header_width.len()
            )));
        }
        self.max_frame_size = max_frame_size;
        Ok(self)
    }

    /// Switches this config to the legacy 2-byte length header. Only
    /// available with the `legacy-2byte-header` feature; existing
    /// deployments that need wire compatibility with a pre-4-byte-header
    /// peer opt in explicitly rather than this being a runtime default.
    #[cfg(feature = "legacy-2byte-header")]
    pub fn with_legacy_2byte_header(mut self) -> Result<Self> {
        self.header_width = HeaderWidth::Two;
        if self.max_frame_size > self.header_width.max_representable() {
            self.max_frame_size = self.header_width.max_representable();
        }
        Ok(self)
    }
}

/// A `Conn -> Conn` wrapper that reads and writes whole length-prefixed
/// frames instead of raw bytes.
pub struct FramedConn {
    inner: Box<dyn Conn>,
    config: FramedConfig,
    pending: Vec<u8>,
    pending_offset: usize,
}

impl FramedConn {
    /// Wraps `inner` with the default [`FramedConfig`].
    pub fn new(inner: Box<dyn Conn>) -> Self {
        Self::with_config(inner, FramedConfig::default())
    }

    /// Wraps `inner` with an explicit [`FramedConfig`].
    pub fn with_config(inner: Box<dyn Conn>, config: FramedConfig) -> Self {
        Self {
            inner,
            config,
            pending: Vec::new(),
            pending_offset: 0,
        }
    }

    fn pending_remaining(&self) -> &[u8] {
        &self.pending[self.pending_offset..]
    }

    async fn read_exact_from_inner(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::Eof);
            }
            filled += n;
        }
        Ok(())
    }

    async fn read_next_frame(&mut self) -> Result<Vec<u8>> {
        let header_len = self.config.header_width.len();
        let mut header = vec![0u8; header_len];
        self.read_exact_from_inner(&mut header).await?;
        let len = self.config.header_width.decode(&header);
        if len > self.config.max_frame_size {
            return Err(Error::FrameTooLarge {
                len,
                max: self.config.max_frame_size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut payload = vec![0u8; len as usize];
        self.read_exact_from_inner(&mut payload).await?;
        Ok(payload)
    }
}

#[async_trait]
impl Conn for FramedConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending_offset >= self.pending.len() {
            let frame = self.read_next_frame().await?;
            self.pending = frame;
            self.pending_offset = 0;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }
        let remaining = self.pending_remaining();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pending_offset += n;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let len = u32::try_from(buf.len()).map_err(|_| Error::PacketTooLarge {
            len: buf.len(),
            max: self.config.header_width.max_representable() as usize,
        })?;
        if len > self.config.max_frame_size {
            return Err(Error::FrameTooLarge {
                len,
                max: self.config.max_frame_size,
            });
        }
        let header = self.config.header_width.encode(len);
        self.inner.write(&header).await?;
        if !buf.is_empty() {
            self.inner.write(buf).await?;
        }
        if let Some(buffered) = self.inner.as_buf_conn() {
            buffered.flush().await?;
        }
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn max_write(&self) -> u16 {
        let inner_max = self.inner.max_write();
        if inner_max == 0 {
            0
        } else {
            inner_max.saturating_sub(self.config.header_width.len() as u16)
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
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
    use netx_core::test_support::DuplexConn;

    #[tokio::test]
    async fn round_trips_a_single_frame() {
        let (a, b) = DuplexConn::pair(4096);
        let mut writer = FramedConn::new(Box::new(a));
        let mut reader = FramedConn::new(Box::new(b));

        writer.write(b"hello world").await.unwrap();
        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[tokio::test]
    async fn keep_alive_frame_reads_as_zero() {
        let (a, b) = DuplexConn::pair(4096);
        let mut writer = FramedConn::new(Box::new(a));
        let mut reader = FramedConn::new(Box::new(b));

        writer.write(b"").await.unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn does_not_interleave_two_frames_across_small_reads() {
        let (a, b) = DuplexConn::pair(4096);
        let mut writer = FramedConn::new(Box::new(a));
        let mut reader = FramedConn::new(Box::new(b));

        writer.write(b"first").await.unwrap();
        writer.write(b"second").await.unwrap();

        let mut buf = [0u8; 3];
        let n1 = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n1], b"fir");
        let n2 = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n2], b"st");

        let mut buf2 = [0u8; 16];
        let n3 = reader.read(&mut buf2).await.unwrap();
        assert_eq!(&buf2[..n3], b"second");
    }

    #[tokio::test]
    async fn oversized_header_rejects_with_frame_too_large() {
        let (a, b) = DuplexConn::pair(4096);
        let config = FramedConfig::new().with_max_frame_size(8).unwrap();
        let mut writer = FramedConn::with_config(Box::new(a), config);
        let mut reader_inner = FramedConn::with_config(Box::new(b), config);

        // Bypass the writer's own size check by writing raw bytes directly
        // through the underlying inner conn so the reader sees an oversized
        // header.
        let big_header = 9u32.to_be_bytes();
        writer.inner.write(&big_header).await.unwrap();

        let mut buf = [0u8; 16];
        let err = reader_inner.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len: 9, max: 8 }));
    }

    #[cfg(feature = "legacy-2byte-header")]
    #[test]
    fn with_max_frame_size_rejects_a_value_the_legacy_header_cannot_encode() {
        let config = FramedConfig::new().with_legacy_2byte_header().unwrap();
        let err = config.with_max_frame_size(u32::from(u16::MAX) + 1).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn max_write_accounts_for_header_overhead() {
        struct FakeMaxWrite;
        #[async_trait]
        impl Conn for FakeMaxWrite {
            async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
                Ok(0)
            }
            async fn write(&mut self, buf: &[u8]) -> Result<usize> {
                Ok(buf.len())
            }
            async fn close(&mut self) -> Result<()> {
                Ok(())
            }
            fn max_write(&self) -> u16 {
                1024
            }
            fn set_deadline(&mut self, _when: Option<Instant>) {}
            fn set_read_deadline(&mut self, _when: Option<Instant>) {}
            fn set_write_deadline(&mut self, _when: Option<Instant>) {}
        }
        let framed = FramedConn::new(Box::new(FakeMaxWrite));
        assert_eq!(framed.max_write(), 1024 - 4);
    }
}
