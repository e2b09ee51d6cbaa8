#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx` is the top-level composition crate: a library of composable
//! network-connection transformers that wrap a stream or datagram endpoint
//! and expose a richer endpoint of the same shape. It re-exports the four
//! pipe types ([`Listener`], [`Dialer`], [`Conn`], [`TaggedConn`]) and every
//! wrapper from the `netx-*` crates, and, behind the `registry` feature,
//! [`builtin_registry`] — a [`Registry`] pre-populated with a [`Driver`] for
//! each wrapper so a pipeline description can be built and validated purely
//! by name.
//!
//! # Design
//!
//! This crate carries no logic of its own beyond [`builtin_registry`] —
//! every wrapper's behavior lives in its own `netx-*` crate, kept
//! independently buildable and testable.
//!
//! # See also
//!
//! `netx-core` for the pipe-type definitions and shared concurrency
//! primitives; `netx-registry` for the pipeline validation/application
//! machinery [`builtin_registry`] is built on.

pub use netx_core::{
    BoundedQueue, BufConn, Conn, Deadline, Deadlines, Dialer, Error, Listener, MaxWrite, OneShotClose, PipeKind,
    PipeValue, Result, Tag, TaggedConn,
};

#[cfg(feature = "registry")]
pub use netx_registry::{Driver, Params, PipelineEntry, Registry, Side, Wrapper, apply_pipeline, validate};

pub use netx_framed::{FramedConfig, FramedConn};

pub use netx_aesgcm::AesGcmConfig;
pub use netx_aesgcm::AesGcmConn;

pub use netx_demux::{Demux, DemuxClient, DemuxConfig, DemuxSession, DemuxStats, TaggedDemux, TaggedDemuxSession};

pub use netx_mux::{Mux, MuxClient, MuxConfig, MuxStats};

pub use netx_poll::{PollConfig, PollConn, PollServerConfig, PollServerConn};

pub use netx_dns::{DnsClient, DnsClientConfig, DnsServer, DnsServerConfig};

/// Builds a [`Registry`] with every wrapper in this workspace registered
/// under its driver name (`framed`, `aesgcm`, `demux`, `taggeddemux`,
/// `demuxclient`, `mux`, `muxclient`, `poll`, `pollserver`, `dnsclient`,
/// `dnsserver`). Callers needing only a subset can build a narrower
/// [`Registry`] by hand instead; this is a convenience, not the only way to
/// assemble one.
#[cfg(feature = "registry")]
pub fn builtin_registry() -> Registry {
    let registry = Registry::new();
    registry.register(std::sync::Arc::new(netx_framed::FramedDriver));
    registry.register(std::sync::Arc::new(netx_aesgcm::AesGcmDriver));
    registry.register(std::sync::Arc::new(netx_demux::DemuxDriver));
    registry.register(std::sync::Arc::new(netx_demux::TaggedDemuxDriver));
    registry.register(std::sync::Arc::new(netx_demux::DemuxClientDriver));
    registry.register(std::sync::Arc::new(netx_mux::MuxDriver));
    registry.register(std::sync::Arc::new(netx_mux::MuxClientDriver));
    registry.register(std::sync::Arc::new(netx_poll::PollConnDriver));
    registry.register(std::sync::Arc::new(netx_poll::PollServerConnDriver));
    registry.register(std::sync::Arc::new(netx_dns::DnsClientDriver));
    registry.register(std::sync::Arc::new(netx_dns::DnsServerDriver));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::{in_memory_pair, PacketConn, TaggedPacketConn};

    #[cfg(feature = "registry")]
    #[test]
    fn builtin_registry_knows_every_driver_name() {
        let registry = builtin_registry();
        for name in [
            "framed",
            "aesgcm",
            "demux",
            "taggeddemux",
            "demuxclient",
            "mux",
            "muxclient",
            "poll",
            "pollserver",
            "dnsclient",
            "dnsserver",
        ] {
            registry.lookup(name).unwrap_or_else(|_| panic!("{name} should be registered"));
        }
    }

    /// `muxclient` (`Dialer -> Conn`) followed by `demuxclient` (`Conn ->
    /// Dialer`) round-trips back to the client-side boundary type, per
    /// spec.md §3's "final output equals the starting type" rule.
    #[cfg(feature = "registry")]
    #[tokio::test]
    async fn muxclient_then_demuxclient_pipeline_type_checks_and_applies() {
        let registry = builtin_registry();
        let entries = vec![
            PipelineEntry {
                driver: "muxclient".to_string(),
                params: Params::default(),
            },
            PipelineEntry {
                driver: "demuxclient".to_string(),
                params: Params::default(),
            },
        ];
        let wrappers = validate(&registry, &entries, Side::Client).unwrap();

        let (_listener, dialer) = in_memory_pair(1, 64);
        let value = PipeValue::Dialer(Box::new(dialer));
        let applied = apply_pipeline(&wrappers, value).await.unwrap();
        assert_eq!(applied.kind(), PipeKind::Dialer);
    }

    /// A DemuxClient -> TCP-like stream on one end, TCP-like -> TaggedDemux
    /// on the other: exercises tag pairing end-to-end across two distinct
    /// wrapper crates glued only through the shared `Conn`/`TaggedConn`
    /// traits, not through any `netx`-internal coupling. The server side
    /// accepts a session the same way a plain `Demux` would; the session's
    /// `write` replays whatever tag its `read` captured from the underlying
    /// tagged transport.
    #[tokio::test]
    async fn demux_client_and_tagged_demux_interoperate_end_to_end() {
        let (client_transport, server_transport) = PacketConn::pair(64);

        let client_dialer = DemuxClient::new(Box::new(client_transport), DemuxConfig::new());
        let mut server = TaggedDemux::new(Box::new(TaggedPacketConn::new(server_transport)), DemuxConfig::new());

        let mut session = client_dialer.dial().await.unwrap();
        session.write(b"hello tcp").await.unwrap();

        let mut accepted = server.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = accepted.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello tcp");

        accepted.write(b"hello tcp").await.unwrap();

        let mut reply = [0u8; 64];
        let n = session.read(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"hello tcp");
    }
}
