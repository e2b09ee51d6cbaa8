#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-dns` is the DNS tunnel codec: [`DnsClient`] packs each write into a
//! TXT query QNAME (Base32-in-QNAME up) and unpacks each read from the
//! matching TXT answer (Base32-in-TXT down); [`DnsServer`] is the mirror
//! image, parsing queries into payloads tagged with the originating request
//! so replies can be addressed correctly.
//!
//! # Design
//!
//! - [`DnsClient::max_write`] is derived once, at construction, from the
//!   configured domain's length by solving for the largest Base32 QNAME
//!   that still fits in 253 bytes (see [`codec::max_write_for_domain`]),
//!   rather than being a fixed constant — a longer tunnel domain leaves
//!   less room per label.
//! - [`DnsServer`] threads the originating request as
//!   [`netx_core::Tag::DnsRequest`] rather than mutable per-connection
//!   state, so a single `DnsServer` can answer interleaved requests from
//!   many distinct client QNAMEs without a request/reply correlation table.
//!
//! # Invariants
//!
//! - A query lacking any question is a keep-alive, not an error:
//!   [`DnsServer::read_tagged`] returns `Ok((0, Tag::None))`.
//! - A reply's tag must be [`netx_core::Tag::DnsRequest`] (or a
//!   [`netx_core::Tag::Composite`] carrying one); anything else fails with
//!   [`netx_core::Error::InvalidTag`].

mod client;
mod codec;
mod server;

#[cfg(feature = "registry")]
mod registry;
#[cfg(feature = "registry")]
pub use registry::{DnsClientDriver, DnsServerDriver};

pub use client::{DnsClient, DnsClientConfig};
pub use server::{DnsServer, DnsServerConfig};
