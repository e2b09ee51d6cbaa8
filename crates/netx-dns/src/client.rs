//! [`DnsClient`]: the up-direction half of the DNS tunnel, a `Conn -> Conn`
//! wrapper that encodes each write as a TXT query QNAME and decodes each
//! read from the matching TXT answer.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};

use netx_core::{Conn, Error, Result};

use crate::codec::{decode_txt_chunks, encode_qname, max_write_for_domain};

/// Configuration for a [`DnsClient`].
#[derive(Clone, Debug)]
pub struct DnsClientConfig {
    /// The tunnel domain every QNAME is suffixed with, e.g. `tunnel.example.com`.
    pub domain: String,
}

impl DnsClientConfig {
    /// Starts a builder for the given tunnel domain.
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }
}

/// Turns a strict request/response datagram [`Conn`] into the client side of
/// a DNS tunnel: every `write` becomes a TXT query for a Base32-packed
/// QNAME; every `read` decodes the matching TXT answer back to raw bytes.
pub struct DnsClient {
    inner: Box<dyn Conn>,
    config: DnsClientConfig,
    max_write: u16,
}

impl DnsClient {
    /// Wraps `inner`. `MaxWrite` is derived once from `config.domain`'s
    /// length so the encoded QNAME never exceeds 253 bytes.
    pub fn new(inner: Box<dyn Conn>, config: DnsClientConfig) -> Self {
        let max_write = max_write_for_domain(&config.domain);
        Self { inner, config, max_write }
    }
}

#[async_trait]
impl Conn for DnsClient {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut wire = vec![0u8; 64 * 1024];
        let n = self.inner.read(&mut wire).await?;
        let response = Message::from_bytes(&wire[..n]).map_err(|err| Error::Io(io::Error::other(err)))?;

        let txt_chunks: Vec<Vec<u8>> = response
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                Some(RData::TXT(txt)) => Some(txt.txt_data().iter().map(|s| s.to_vec()).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect();

        if txt_chunks.is_empty() {
            return Ok(0);
        }

        let payload = decode_txt_chunks(&txt_chunks).ok_or(Error::InvalidDomain)?;
        if payload.len() > buf.len() {
            return Err(Error::ShortBuffer {
                needed: payload.len(),
                capacity: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.max_write > 0 && buf.len() > self.max_write as usize {
            return Err(Error::PacketTooLarge {
                len: buf.len(),
                max: self.max_write as usize,
            });
        }

        let qname = encode_qname(buf, &self.config.domain);
        let name = Name::from_ascii(&qname).map_err(|err| Error::Io(io::Error::other(err)))?;

        let mut message = Message::new();
        message.set_id(rand::random());
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(name, RecordType::TXT));

        let wire = message.to_bytes().map_err(|err| Error::Io(io::Error::other(err)))?;
        self.inner.write(&wire).await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn max_write(&self) -> u16 {
        self.max_write
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
    use netx_core::test_support::PacketConn;

    #[tokio::test]
    async fn max_write_rejects_an_oversized_payload() {
        let (a, _b) = PacketConn::pair(8);
        let mut client = DnsClient::new(Box::new(a), DnsClientConfig::new("tunnel.example.com"));
        let oversized = vec![0u8; client.max_write() as usize + 1];
        let err = client.write(&oversized).await.unwrap_err();
        assert!(matches!(err, Error::PacketTooLarge { .. }));
    }
}
