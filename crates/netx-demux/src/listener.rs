//! [`Demux`]: a `Conn -> Listener` wrapper. Each incoming session id the
//! actor has not seen before is accepted as a fresh [`DemuxSession`],
//! pushed onto a bounded accept queue that drops the newest arrival on
//! overflow rather than stalling the shared reader.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, Deadline, Error, Listener, OneShotClose, Result, TrySendOutcome};

use crate::session::DemuxSession;
use crate::shared::{DemuxConfig, DemuxStats, SessionState, Shared};

/// Splits one underlying [`Conn`] into many independently readable/writable
/// sessions, keyed by an id prefix each message carries.
pub struct Demux {
    shared: Arc<Shared>,
    accept_queue: Arc<BoundedQueue<DemuxSession>>,
    never: Deadline,
}

impl Demux {
    /// Spawns the actor task over `inner` and returns the `Listener` half.
    pub fn new(inner: Box<dyn Conn>, config: DemuxConfig) -> Self {
        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            sessions: dashmap::DashMap::new(),
            write_tx: write_tx.clone(),
            config,
            shutdown: OneShotClose::new(),
        });
        let accept_queue = Arc::new(BoundedQueue::new(config.queue_capacity));

        let actor_shared = shared.clone();
        let actor_accept_queue = accept_queue.clone();
        let on_unknown_id = move |id: Vec<u8>, payload: Vec<u8>| {
            let state = Arc::new(SessionState {
                read_queue: BoundedQueue::new(actor_shared.config.queue_capacity),
                closed: OneShotClose::new(),
            });
            let _ = state.read_queue.producer().try_send(payload);
            let session = DemuxSession::new(id.clone(), state.clone(), actor_shared.write_tx.clone());
            if actor_accept_queue.try_send(session) == TrySendOutcome::Sent {
                actor_shared.sessions.insert(id, state);
            }
        };

        let exit_accept_queue = accept_queue.clone();
        tokio::spawn(crate::shared::run_actor(
            inner,
            shared.clone(),
            write_rx,
            on_unknown_id,
            async move { exit_accept_queue.close().await },
        ));

        Self {
            shared,
            accept_queue,
            never: Deadline::new(),
        }
    }

    /// A snapshot of live session and pending-accept counts.
    pub fn stats(&self) -> DemuxStats {
        let remaining = self.accept_queue.producer().capacity();
        DemuxStats {
            live_sessions: self.shared.session_count(),
            pending_accepts: self.shared.config.queue_capacity.saturating_sub(remaining),
        }
    }
}

#[async_trait]
impl Listener for Demux {
    async fn accept(&mut self) -> Result<Box<dyn Conn>> {
        let session = self.accept_queue.recv(&self.never).await?;
        Ok(Box::new(session))
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.shutdown.close();
        self.accept_queue.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::PacketConn;

    fn id_bytes(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    #[tokio::test]
    async fn accepts_a_new_session_on_first_message() {
        let (a, b) = PacketConn::pair(8);
        let mut demux = Demux::new(Box::new(b), DemuxConfig::new());

        let mut id_and_payload = id_bytes(7);
        id_and_payload.extend_from_slice(b"hello");
        let mut peer = a;
        peer.write(&id_and_payload).await.unwrap();

        let mut session = demux.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn session_write_is_routed_back_with_its_id() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = Demux::new(Box::new(b), DemuxConfig::new());

        let mut open = id_bytes(3);
        open.extend_from_slice(b"open");
        peer.write(&open).await.unwrap();

        let mut session = demux.accept().await.unwrap();
        session.write(b"reply").await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &id_bytes(3)[..]);
        assert_eq!(&buf[4..n], b"reply");
    }

    #[tokio::test]
    async fn stats_report_live_sessions() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = Demux::new(Box::new(b), DemuxConfig::new());
        assert_eq!(demux.stats().live_sessions, 0);

        let mut open = id_bytes(1);
        open.extend_from_slice(b"x");
        peer.write(&open).await.unwrap();
        let _session = demux.accept().await.unwrap();
        assert_eq!(demux.stats().live_sessions, 1);
    }
}
