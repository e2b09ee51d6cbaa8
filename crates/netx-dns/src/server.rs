//! [`DnsServer`]: the down-direction half of the DNS tunnel, a
//! `Conn -> TaggedConn` wrapper. Each read decodes a TXT query's QNAME and
//! tags the result with the parsed request so a matching write can build a
//! correctly addressed reply.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};

use netx_core::hickory_tag::DnsRequestTag;
use netx_core::{Conn, Error, Result, Tag, TaggedConn};

use crate::codec::{decode_qname, encode_txt_chunks};

/// Configuration for a [`DnsServer`].
#[derive(Clone, Debug)]
pub struct DnsServerConfig {
    /// The tunnel domain every accepted QNAME must end in (case-insensitive).
    pub domain: String,
    /// The largest payload a single `write_tagged` reply may carry before
    /// TXT-chunking, bounded by TXT record capacity. Defaults to 765 bytes
    /// per spec.md §4.7.
    pub max_write: u16,
}

impl DnsServerConfig {
    /// Starts a builder for the given tunnel domain with the default 765-byte
    /// `max_write`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            max_write: 765,
        }
    }

    /// Overrides the default `max_write`.
    pub fn with_max_write(mut self, max_write: u16) -> Self {
        self.max_write = max_write;
        self
    }
}

/// Turns a raw datagram [`Conn`] carrying DNS queries into a [`TaggedConn`]:
/// each `read_tagged` yields the decoded payload tagged with the parsed
/// request, and the matching `write_tagged` must supply that same tag to
/// build a correctly addressed reply.
pub struct DnsServer {
    inner: Box<dyn Conn>,
    config: DnsServerConfig,
}

impl DnsServer {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Conn>, config: DnsServerConfig) -> Self {
        Self { inner, config }
    }
}

fn request_tag_from(wire: &[u8]) -> Tag {
    Tag::DnsRequest(Arc::new(DnsRequestTag {
        encoded_request: wire.to_vec(),
    }))
}

#[async_trait]
impl TaggedConn for DnsServer {
    async fn read_tagged(&mut self, buf: &mut [u8]) -> Result<(usize, Tag)> {
        let mut wire = vec![0u8; 64 * 1024];
        let n = self.inner.read(&mut wire).await?;
        let wire = &wire[..n];

        let message = Message::from_bytes(wire).map_err(|err| Error::Io(io::Error::other(err)))?;
        let Some(query) = message.queries().first() else {
            return Ok((0, Tag::None));
        };

        let qname = query.name().to_ascii();
        let payload = decode_qname(&qname, &self.config.domain).ok_or(Error::InvalidDomain)?;

        if payload.len() > buf.len() {
            return Err(Error::ShortBuffer {
                needed: payload.len(),
                capacity: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok((payload.len(), request_tag_from(wire)))
    }

    async fn write_tagged(&mut self, buf: &[u8], tag: Tag) -> Result<usize> {
        if buf.len() > self.config.max_write as usize {
            return Err(Error::PacketTooLarge {
                len: buf.len(),
                max: self.config.max_write as usize,
            });
        }

        let dns_tag = match tag {
            Tag::DnsRequest(tag) => tag,
            Tag::Composite { dns, .. } => dns,
            other => {
                return Err(Error::invalid_tag(format!(
                    "write_tagged on a DnsServer requires a DnsRequest tag, got {other:?}"
                )));
            }
        };

        let request = Message::from_bytes(&dns_tag.encoded_request).map_err(|err| Error::Io(io::Error::other(err)))?;
        let query = request.queries().first().ok_or_else(|| Error::invalid_tag("tagged request had no question"))?;

        let mut reply = Message::new();
        reply.set_id(request.id());
        reply.set_message_type(MessageType::Response);
        reply.set_op_code(OpCode::Query);
        reply.set_recursion_desired(request.recursion_desired());
        reply.set_recursion_available(true);
        reply.add_query(query.clone());

        let chunks = encode_txt_chunks(buf, 255);
        let txt = TXT::new(chunks);
        let mut record = Record::from_rdata(query.name().clone(), 0, RData::TXT(txt));
        record.set_dns_class(DNSClass::IN);
        record.set_rr_type(RecordType::TXT);
        reply.add_answer(record);

        let wire = reply.to_bytes().map_err(|err| Error::Io(io::Error::other(err)))?;
        self.inner.write(&wire).await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn max_write(&self) -> u16 {
        self.config.max_write
    }

    fn set_deadline(&mut self, when: Option<std::time::Instant>) {
        self.inner.set_deadline(when);
    }

    fn set_read_deadline(&mut self, when: Option<std::time::Instant>) {
        self.inner.set_read_deadline(when);
    }

    fn set_write_deadline(&mut self, when: Option<std::time::Instant>) {
        self.inner.set_write_deadline(when);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DnsClient, DnsClientConfig};
    use netx_core::test_support::PacketConn;
    use netx_core::Conn as _;

    #[tokio::test]
    async fn round_trips_a_payload_through_client_and_server() {
        let (client_side, server_side) = PacketConn::pair(8);
        let mut client = DnsClient::new(Box::new(client_side), DnsClientConfig::new("tunnel.example.com"));
        let mut server = DnsServer::new(Box::new(server_side), DnsServerConfig::new("tunnel.example.com"));

        client.write(b"hello tcp tunnel").await.unwrap();

        let mut buf = [0u8; 256];
        let (n, tag) = server.read_tagged(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello tcp tunnel");

        server.write_tagged(b"reply payload", tag).await.unwrap();

        let mut reply_buf = [0u8; 256];
        let n = client.read(&mut reply_buf).await.unwrap();
        assert_eq!(&reply_buf[..n], b"reply payload");
    }

    #[tokio::test]
    async fn rejects_a_qname_with_the_wrong_domain_suffix() {
        let (client_side, server_side) = PacketConn::pair(8);
        let mut client = DnsClient::new(Box::new(client_side), DnsClientConfig::new("other.example.com"));
        let mut server = DnsServer::new(Box::new(server_side), DnsServerConfig::new("tunnel.example.com"));

        client.write(b"payload").await.unwrap();
        let mut buf = [0u8; 256];
        let err = server.read_tagged(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDomain));
    }

    #[tokio::test]
    async fn write_tagged_rejects_the_wrong_tag_shape() {
        let (_client_side, server_side) = PacketConn::pair(8);
        let mut server = DnsServer::new(Box::new(server_side), DnsServerConfig::new("tunnel.example.com"));
        let err = server.write_tagged(b"x", Tag::None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTag { .. }));
    }
}
