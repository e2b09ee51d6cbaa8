#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-core` defines the four *pipe types* that every layer in the `netx`
//! composition core consumes or produces — [`Listener`], [`Dialer`],
//! [`Conn`], and [`TaggedConn`] — plus the shared concurrency primitives
//! every wrapper crate (`netx-framed`, `netx-aesgcm`, `netx-demux`,
//! `netx-mux`, `netx-poll`, `netx-dns`) builds on: a categorized [`Error`]
//! taxonomy, a deadline cell that wakes a blocked reader when the deadline
//! changes, a one-shot close flag, and a small bounded-queue helper that
//! always drops rather than blocks on overflow.
//!
//! # Design
//!
//! - [`Conn`] mirrors a socket: `read`/`write`/`close`, local/remote
//!   addresses, and three independent deadlines. A `read` returning `Ok(0)`
//!   is a distinct "keep-alive" event, never conflated with EOF.
//! - [`TaggedConn`] is a [`Conn`] whose reads additionally yield a [`Tag`]
//!   and whose writes additionally consume one. Tags are a closed sum type
//!   rather than `Box<dyn Any>` so a tag-consuming layer can reject the
//!   wrong shape with [`Error::InvalidTag`] at the type level.
//! - [`Deadline`] represents "overall / read / write deadline" as an
//!   epoch-valued cell plus a [`tokio::sync::Notify`]; any task racing the
//!   deadline wakes and recomputes the remaining time whenever the deadline
//!   changes, instead of relying on an OS-level socket timeout.
//!
//! # Invariants
//!
//! - No primitive in this crate holds a lock across an `.await` point.
//! - [`BoundedQueue::try_send`] never blocks; on a full queue it reports the
//!   drop so the caller's read loop can continue serving other sessions.
//!
//! # See also
//!
//! `netx-registry`, which types wrapper chains over these pipe traits, and
//! `netx-demux`/`netx-mux`, which are the primary consumers of [`TaggedConn`].

mod deadline;
mod error;
mod pipe;
mod queue;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use deadline::{Deadline, Deadlines};
pub use error::Error;
pub use pipe::{
    hickory_tag, BufConn, Conn, Dialer, Listener, MaxWrite, PipeKind, PipeValue, Tag, TaggedConn,
};
pub use queue::{BoundedQueue, OneShotClose, TrySendOutcome};

/// Convenience alias used throughout the `netx` workspace.
pub type Result<T> = std::result::Result<T, Error>;
