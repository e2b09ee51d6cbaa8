#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-demux` fans one shared underlying [`Conn`](netx_core::Conn) into
//! many independently readable/writable sessions keyed by a fixed-length
//! byte id prefix each wire message carries. Three flavors share one actor
//! task (`shared::run_actor`), which is the only task that ever touches the
//! underlying `Conn`:
//!
//! - [`Demux`] (`Conn -> Listener`): accepts a fresh [`DemuxSession`] for
//!   every id not seen before.
//! - [`TaggedDemux`] (`TaggedConn -> Listener`): identical to `Demux`, but
//!   driven over a [`netx_core::TaggedConn`] instead of a plain `Conn`. Each
//!   accepted [`TaggedDemuxSession`] carries a `tag_queue` that captures the
//!   underlying transport's tag on every read and replays it, in FIFO order,
//!   on the matching write — so a lower tag-bearing layer (the DNS tunnel
//!   server, a `Mux`) stays reachable through the session's reply.
//! - [`DemuxClient`] (`Conn -> Dialer`): the client side, minting a fresh id
//!   per `dial()` rather than accepting unsolicited ones.
//!
//! # Design
//!
//! One actor task owns the underlying `Conn`/`TaggedConn` and dispatches
//! inbound `(id, payload[, tag])` pairs to per-session bounded queues,
//! mirroring the teacher's daemon session-table idiom (`crates/daemon`): a
//! `dashmap` keyed by id rather than a `Mutex<HashMap<_>>`, so session
//! lookups never contend with the accept/dial path.
//!
//! # Invariants
//!
//! - The actor never blocks on a full session/accept queue; per spec.md
//!   §4.4, an overflow always drops rather than stalls the shared reader.
//! - A wire message shorter than `id_len` means framing itself is lost: the
//!   actor terminates and the whole multiplex transitions to closed, the
//!   same as a read failure on the underlying `Conn`.
//!
//! # See also
//!
//! `netx-mux`, the complementary per-sub-connection (rather than
//! per-session-id) multiplexing primitive.

mod client;
mod listener;
mod session;
mod shared;
mod tagged;

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::{DemuxClientDriver, DemuxDriver, TaggedDemuxDriver};

pub use client::DemuxClient;
pub use listener::Demux;
pub use session::DemuxSession;
pub use shared::{DemuxConfig, DemuxStats};
pub use tagged::{TaggedDemux, TaggedDemuxSession};
