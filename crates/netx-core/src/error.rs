use std::io;

/// The error taxonomy shared by every `netx` wrapper crate.
///
/// Every public operation in the composition core returns one of these
/// variants or succeeds; none of them is ever silently swallowed except the
/// two *intentional drops* documented on [`crate::BoundedQueue`] (a full
/// session read queue, a full accept queue), which are a documented part of
/// the Demux/Mux contract rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying stream ended cleanly. Distinct from [`Error::Closed`]:
    /// `Eof` is observed from the peer, `Closed` is a local decision.
    #[error("connection reached end of file")]
    Eof,

    /// This endpoint has already been closed locally.
    #[error("connection is closed")]
    Closed,

    /// A read or write did not complete before its deadline.
    #[error("operation exceeded its deadline")]
    DeadlineExceeded,

    /// The caller's buffer was too small to hold an atomic message. The
    /// message has already been consumed off the wire and is lost; see the
    /// AES-GCM codec's documented lossy-`ShortBuffer` behavior.
    #[error("caller buffer too small for message of {needed} bytes (capacity {capacity})")]
    ShortBuffer {
        /// Bytes the message needed.
        needed: usize,
        /// Bytes the caller's buffer could hold.
        capacity: usize,
    },

    /// The underlying `Conn` wrote fewer bytes than an atomic unit required.
    #[error("short write: wrote {wrote} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        wrote: usize,
        /// Bytes the atomic unit required.
        expected: usize,
    },

    /// An incoming Framed length prefix exceeded the configured maximum.
    #[error("frame length {len} exceeds max_frame_size {max}")]
    FrameTooLarge {
        /// Length the peer announced.
        len: u32,
        /// Configured ceiling.
        max: u32,
    },

    /// A packet (AES-GCM or Demux) exceeded the configured upper bound.
    #[error("packet of {len} bytes exceeds the {max}-byte limit")]
    PacketTooLarge {
        /// Observed or attempted packet length.
        len: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// A packet was shorter than the protocol's minimum atomic unit.
    #[error("packet of {len} bytes is shorter than the {min}-byte minimum")]
    PacketTooSmall {
        /// Observed packet length.
        len: usize,
        /// Minimum the protocol requires.
        min: usize,
    },

    /// A received packet's length exactly matched the configured maximum,
    /// which the AES-GCM codec treats as a suspected truncation rather than
    /// a legitimate full-size packet.
    #[error("packet length {len} equals the {max}-byte limit, suspected truncation")]
    PacketTruncated {
        /// Observed packet length, equal to `max`.
        len: usize,
        /// Configured ceiling the packet length matched.
        max: usize,
    },

    /// A `TaggedConn::write_tagged` call received a tag of the wrong shape
    /// or a stale identity (e.g. a Mux sub-connection that has since closed).
    #[error("invalid tag: {reason}")]
    InvalidTag {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// The DNS tunnel's QNAME suffix did not match the configured domain.
    #[error("QNAME does not end in the configured tunnel domain")]
    InvalidDomain,

    /// AES-GCM authenticated decryption rejected the ciphertext.
    #[error("AEAD decryption failed: ciphertext or sequence was tampered with")]
    DecryptFailed,

    /// AES-GCM authenticated encryption failed. In practice this only
    /// happens if a single session's sequence counter wraps past the
    /// AEAD's safe message limit.
    #[error("AEAD encryption failed")]
    EncryptFailed,

    /// The IV handshake did not complete before its deadline.
    #[error("AES-GCM IV handshake did not complete within {0:?}")]
    HandshakeTimedOut(std::time::Duration),

    /// A wrapper in a pipeline was incompatible with its position.
    #[error("wrapper at position {position} ({driver}) cannot accept a {found:?} (expects one of {expected:?})")]
    PipelineTypeMismatch {
        /// Zero-based position of the offending wrapper in the pipeline.
        position: usize,
        /// Name of the offending driver.
        driver: String,
        /// Pipe type the pipeline actually produced up to this point.
        found: crate::pipe::PipeKind,
        /// Pipe types the offending wrapper declares it accepts.
        expected: Vec<crate::pipe::PipeKind>,
    },

    /// A pipeline referenced a driver name with no registered factory.
    #[error("unknown driver {name:?}")]
    UnknownDriver {
        /// The unrecognized driver name, lowercased.
        name: String,
    },

    /// A driver rejected one of its parameters.
    #[error("invalid parameter {key:?}={value:?} for driver {driver:?}: {reason}")]
    InvalidParameter {
        /// Driver that rejected the parameter.
        driver: String,
        /// Parameter key.
        key: String,
        /// Parameter value as given.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration value was out of range at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for I/O failures surfaced by the collaborator transport.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for constructing [`Error::InvalidTag`].
    pub fn invalid_tag(reason: impl Into<String>) -> Self {
        Error::InvalidTag {
            reason: reason.into(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Eof => io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, err.to_string()),
            Error::DeadlineExceeded => io::Error::new(io::ErrorKind::TimedOut, err.to_string()),
            Error::Io(source) => source,
            other => io::Error::other(other),
        }
    }
}
