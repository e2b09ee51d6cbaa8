use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::Result;

/// The largest payload a single `Write` can carry through a given `Conn`
/// without the layer needing to split it. `0` means unadvertised. A layer
/// that adds `n` bytes of header composes this by `saturating_sub(n)`; a
/// layer that cannot split messages must reject writes that would exceed
/// the derived limit with [`crate::Error::PacketTooLarge`].
pub type MaxWrite = u16;

/// The closed sum of pipe types every `netx` wrapper declares as an input
/// or output. Used by `netx-registry` to validate pipelines at parse time
/// and by [`crate::Error::PipelineTypeMismatch`] to name the offending
/// position.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PipeKind {
    /// Accepts sub-connections.
    Listener,
    /// Produces sub-connections on demand.
    Dialer,
    /// A byte/message endpoint.
    Conn,
    /// A `Conn` whose reads/writes carry an opaque tag.
    TaggedConn,
}

impl fmt::Display for PipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipeKind::Listener => "Listener",
            PipeKind::Dialer => "Dialer",
            PipeKind::Conn => "Conn",
            PipeKind::TaggedConn => "TaggedConn",
        };
        f.write_str(name)
    }
}

/// Opaque context captured by a [`TaggedConn::read_tagged`] call and
/// required by the matching [`TaggedConn::write_tagged`] call to route the
/// reply correctly.
///
/// Modeled as a closed sum rather than `Box<dyn Any>` (see Design Notes in
/// `SPEC_FULL.md` §9) so a tag-consuming layer can reject the wrong shape
/// with [`crate::Error::InvalidTag`] instead of a downcast panic.
#[derive(Debug, Clone)]
pub enum Tag {
    /// No routing context; synthesized by layers that wrap a plain `Conn`
    /// into a `TaggedConn` (e.g. a `Demux` session write with nothing to
    /// reply through beyond the shared underlying `Conn`).
    None,
    /// The stable arena id of the sub-connection a `Mux` read arrived on.
    OriginConn(u64),
    /// The wire session id a `TaggedDemux` read arrived under. Carried as
    /// raw bytes (rather than `OriginConn`'s `u64`) because a Demux id width
    /// is a configurable `1..=32` bytes, not fixed at 8.
    DemuxSession(Vec<u8>),
    /// A parsed DNS request message, captured by the DNS tunnel server so a
    /// reply can be built with matching transaction id and question.
    DnsRequest(std::sync::Arc<hickory_tag::DnsRequestTag>),
    /// A DNS tag threaded through an intermediate `TaggedDemux` layer,
    /// preserved so the DNS server below can still reply correctly.
    Composite {
        /// The DNS leg of the composite tag.
        dns: std::sync::Arc<hickory_tag::DnsRequestTag>,
        /// The inner leg (e.g. a Demux session id) carried alongside it.
        inner: Box<Tag>,
    },
}

/// Placeholder module so [`Tag::DnsRequest`] can name a concrete type
/// without `netx-core` depending on `netx-dns`/`hickory-proto`. `netx-dns`
/// defines [`hickory_tag::DnsRequestTag`] and produces these tags; every
/// other crate only moves them around opaquely.
pub mod hickory_tag {
    /// Opaque carrier for a parsed DNS request, filled in by `netx-dns`.
    ///
    /// `netx-core` cannot depend on `hickory-proto` (it would invert the
    /// dependency graph), so this is an empty marker `netx-dns` extends via
    /// its own newtype stored behind the `Arc` in [`super::Tag::DnsRequest`].
    #[derive(Debug)]
    pub struct DnsRequestTag {
        /// Opaque encoded form of the originating DNS request, sufficient
        /// for `netx-dns` to reconstruct a reply. Stored as bytes here so
        /// this crate never names `hickory_proto::op::Message` directly.
        pub encoded_request: Vec<u8>,
    }
}

/// An endpoint supporting `read`/`write`/`close`, local/remote addresses,
/// and three independent deadlines.
///
/// A `read` returning `Ok(0)` means "keep-alive / empty message"; EOF is the
/// distinct [`crate::Error::Eof`]. A `write` is all-or-nothing per call
/// unless the implementation documents a short-write error.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Reads into `buf`, returning the number of bytes placed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf`, or fails with [`crate::Error::ShortWrite`].
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Closes this endpoint. Idempotent: a second call returns `Ok(())`.
    async fn close(&mut self) -> Result<()>;

    /// The advertised [`MaxWrite`] for this endpoint, or `0` if unadvertised.
    fn max_write(&self) -> MaxWrite {
        0
    }

    /// This endpoint's local address, if meaningful for the transport.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// This endpoint's remote address, if meaningful for the transport.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Sets the overall deadline, applying to both reads and writes.
    fn set_deadline(&mut self, when: Option<Instant>);

    /// Sets the read-specific deadline.
    fn set_read_deadline(&mut self, when: Option<Instant>);

    /// Sets the write-specific deadline.
    fn set_write_deadline(&mut self, when: Option<Instant>);

    /// Returns this connection as a [`BufConn`], if it provides explicit
    /// write buffering. `netx-framed` uses this to flush once after a
    /// frame's header and payload instead of relying on two unbuffered
    /// writes reaching the wire separately.
    fn as_buf_conn(&mut self) -> Option<&mut dyn BufConn> {
        None
    }
}

/// As [`Conn`], but each read yields an opaque [`Tag`] and each write
/// consumes one.
///
/// Implementations that wrap a plain `Conn` must synthesize ([`Tag::None`])
/// or drop tags; implementations that route on tags (Mux, the DNS tunnel
/// server, TaggedDemux) must preserve them unmodified after emission.
#[async_trait]
pub trait TaggedConn: Send + Sync {
    /// Reads into `buf`, returning the byte count and setting `tag`.
    async fn read_tagged(&mut self, buf: &mut [u8]) -> Result<(usize, Tag)>;

    /// Writes `buf`, consuming `tag` to route the reply.
    async fn write_tagged(&mut self, buf: &[u8], tag: Tag) -> Result<usize>;

    /// Closes this endpoint. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// The advertised [`MaxWrite`] for this endpoint, or `0` if unadvertised.
    fn max_write(&self) -> MaxWrite {
        0
    }

    /// Sets the overall deadline, applying to both reads and writes.
    fn set_deadline(&mut self, when: Option<Instant>);

    /// Sets the read-specific deadline.
    fn set_read_deadline(&mut self, when: Option<Instant>);

    /// Sets the write-specific deadline.
    fn set_write_deadline(&mut self, when: Option<Instant>);
}

/// Accepts sub-connections, supplied by the host transport layer (TCP, UDP,
/// ICMP listeners are collaborators; this crate defines only the seam).
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accepts the next sub-connection.
    async fn accept(&mut self) -> Result<Box<dyn Conn>>;

    /// Stops accepting and releases any OS resources.
    async fn close(&mut self) -> Result<()>;

    /// This listener's bound local address, if meaningful.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Produces sub-connections on demand, supplied by the host transport layer.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establishes and returns a new sub-connection.
    async fn dial(&self) -> Result<Box<dyn Conn>>;
}

/// A [`Conn`] that buffers writes and requires an explicit flush to push
/// them onto the wire. [`netx-framed`]'s writer checks for this marker and,
/// when present, flushes once after the header+payload so both coalesce
/// into a single underlying write instead of two.
#[async_trait]
pub trait BufConn: Conn {
    /// Pushes any buffered bytes onto the wire.
    async fn flush(&mut self) -> Result<()>;
}

/// One concrete value flowing through a pipeline fold: the output of one
/// wrapper and the input to the next. `netx-registry` walks a pipeline by
/// repeatedly pattern-matching on this enum.
pub enum PipeValue {
    /// A listener value.
    Listener(Box<dyn Listener>),
    /// A dialer value.
    Dialer(Box<dyn Dialer>),
    /// A plain connection value.
    Conn(Box<dyn Conn>),
    /// A tagged connection value.
    TaggedConn(Box<dyn TaggedConn>),
}

impl PipeValue {
    /// The [`PipeKind`] of this value, used for pipeline diagnostics.
    pub fn kind(&self) -> PipeKind {
        match self {
            PipeValue::Listener(_) => PipeKind::Listener,
            PipeValue::Dialer(_) => PipeKind::Dialer,
            PipeValue::Conn(_) => PipeKind::Conn,
            PipeValue::TaggedConn(_) => PipeKind::TaggedConn,
        }
    }

    /// Closes whatever is inside, used to unwind a partially built pipeline
    /// when a later wrapper fails to apply.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            PipeValue::Listener(l) => l.close().await,
            PipeValue::Dialer(_) => Ok(()),
            PipeValue::Conn(c) => c.close().await,
            PipeValue::TaggedConn(t) => t.close().await,
        }
    }
}
