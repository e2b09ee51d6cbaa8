//! [`DemuxClient`]: a `Conn -> Dialer` wrapper. Every `dial()` call mints a
//! fresh session id and registers it before handing back the session, so a
//! reply that arrives before `dial()` even returns still routes correctly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, Dialer, OneShotClose, Result};

use crate::session::DemuxSession;
use crate::shared::{DemuxConfig, DemuxStats, SessionState, Shared};

/// Dials fresh multiplexed sessions over one shared underlying [`Conn`].
pub struct DemuxClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl DemuxClient {
    /// Spawns the actor task over `inner` and returns the `Dialer` half.
    /// Messages whose id does not match any session this client opened are
    /// dropped: a `DemuxClient` never accepts unsolicited sessions.
    pub fn new(inner: Box<dyn Conn>, config: DemuxConfig) -> Self {
        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            sessions: dashmap::DashMap::new(),
            write_tx,
            config,
            shutdown: OneShotClose::new(),
        });

        let on_unknown_id = move |_id: Vec<u8>, _payload: Vec<u8>| {
            #[cfg(feature = "tracing")]
            tracing::debug!("DemuxClient dropping message for a session it never opened");
        };

        tokio::spawn(crate::shared::run_actor(
            inner,
            shared.clone(),
            write_rx,
            on_unknown_id,
            async {},
        ));

        Self {
            shared,
            next_id: AtomicU64::new(0),
        }
    }

    fn mint_id(&self) -> Vec<u8> {
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed);
        let full = counter.to_be_bytes();
        let id_len = self.shared.config.id_len;
        if id_len <= 8 {
            full[8 - id_len..].to_vec()
        } else {
            let mut id = vec![0u8; id_len - 8];
            id.extend_from_slice(&full);
            id
        }
    }

    /// A snapshot of live session counts. `pending_accepts` is always `0`:
    /// `DemuxClient` has no accept queue.
    pub fn stats(&self) -> DemuxStats {
        DemuxStats {
            live_sessions: self.shared.session_count(),
            pending_accepts: 0,
        }
    }
}

#[async_trait]
impl Dialer for DemuxClient {
    async fn dial(&self) -> Result<Box<dyn Conn>> {
        let id = self.mint_id();
        let state = Arc::new(SessionState {
            read_queue: BoundedQueue::new(self.shared.config.queue_capacity),
            closed: OneShotClose::new(),
        });
        self.shared.sessions.insert(id.clone(), state.clone());
        let session = DemuxSession::new(id, state, self.shared.write_tx.clone());
        Ok(Box::new(session))
    }
}
