#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-mux` adapts between the `Listener`/`Dialer` pipe types and a
//! single persistent connection, the complement of `netx-demux`'s
//! id-keyed fan-out: [`Mux`] turns a `Listener` accepting many
//! sub-connections into one `TaggedConn`, tagging each read with the
//! sub-connection it arrived on; [`MuxClient`] turns a `Dialer` into one
//! `Conn` that transparently redials whenever the current sub-connection
//! hits EOF on read.
//!
//! # Design
//!
//! Per Design Notes §9 ("Arena-and-id for sub-connections"), `Mux` never
//! lets a session hold a cyclic reference back to itself. Every accepted
//! sub-connection is owned exclusively by its own actor task (see
//! [`shared::run_sub_conn`]), addressed from the outside only through a
//! stable `u64` id stored in a [`dashmap::DashMap`] arena — the same
//! ownership-transfer-on-error idiom `netx-registry::apply_pipeline` and
//! `oc-rsync-transport`'s `NegotiatedStream::try_map_inner` use, generalized
//! to a long-lived per-connection task instead of a single construction
//! step.
//!
//! # Invariants
//!
//! - A reply addressed to a sub-connection that has since closed fails with
//!   [`netx_core::Error::InvalidTag`] rather than silently vanishing.
//! - `MuxClient::write` never redials on EOF: a write's caller is never left
//!   unsure whether the payload reached zero, one, or two sub-connections.
//!
//! # See also
//!
//! `netx-demux`, which multiplexes by wire-carried session id rather than by
//! sub-connection identity.

mod client;
mod mux;
mod shared;

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::{MuxClientDriver, MuxDriver};

pub use client::MuxClient;
pub use mux::Mux;
pub use shared::{MuxConfig, MuxStats};
