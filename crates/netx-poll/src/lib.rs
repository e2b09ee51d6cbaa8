#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-poll` bridges a strict request-response datagram [`Conn`] into a
//! persistent, bidirectional one. [`PollConn`] is the client half: a
//! background worker writes whatever is queued (or an empty keep-alive)
//! every `poll_interval`, then reads exactly one response. [`PollServerConn`]
//! is the server half: it reads one request and immediately answers with
//! whatever the application has queued, or an empty response if nothing is
//! pending.
//!
//! # Design
//!
//! Both workers are independent tasks communicating with their `Conn`
//! handle over bounded channels with deadline-aware receive, mirroring
//! Design Notes §9 ("Control-flow coroutines become message-passing
//! tasks") and the same worker-task shape `netx-demux`'s actor and
//! `netx-mux`'s per-sub-connection pump use.
//!
//! # Invariants
//!
//! - The underlying transport must support a zero-length request/response
//!   round-trip (`Demux`/`DemuxClient` guarantee this via the always-present
//!   id prefix).
//! - `Close` on either side unblocks every pending read/write with
//!   [`netx_core::Error::Closed`] and is idempotent.
//!
//! # See also
//!
//! `netx-dns`, whose server flavor is a canonical datagram transport this
//! bridge is designed to sit on top of.

mod client;
mod server;

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::{PollConnDriver, PollServerConnDriver};

pub use client::{PollConfig, PollConn};
pub use server::{PollServerConfig, PollServerConn};
