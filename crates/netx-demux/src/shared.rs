//! The single actor task shared by [`crate::Demux`], [`crate::TaggedDemux`],
//! and [`crate::DemuxClient`]: it owns the one underlying [`Conn`] and is the
//! only task that ever calls `read`/`write` on it, dispatching inbound
//! messages to per-session queues and serializing outbound writes requested
//! by sessions over an internal channel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, MaxWrite, OneShotClose, Tag, TaggedConn, TrySendOutcome};

/// Configuration shared by every flavor of Demux.
#[derive(Clone, Copy, Debug)]
pub struct DemuxConfig {
    /// Width, in bytes, of the session id prefix on the wire. Must be in
    /// `1..=32`.
    pub id_len: usize,
    /// The largest single `id || payload` message the underlying `Conn` is
    /// expected to carry. The actor's read buffer is sized to this, so a
    /// peer message larger than it is truncated like an oversized datagram.
    pub max_message_size: usize,
    /// Capacity of each session's inbound read queue and the shared accept
    /// queue. Both drop the newest arrival on overflow rather than block.
    pub queue_capacity: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            id_len: 4,
            max_message_size: 64 * 1024,
            queue_capacity: 64,
        }
    }
}

impl DemuxConfig {
    /// Starts a builder with `id_len = 4`, a 64 KiB max message, and a
    /// 64-entry queue capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session id width. Must be `1..=32`.
    pub fn with_id_len(mut self, id_len: usize) -> netx_core::Result<Self> {
        if !(1..=32).contains(&id_len) {
            return Err(netx_core::Error::InvalidConfig(format!(
                "id_len must be between 1 and 32, got {id_len}"
            )));
        }
        self.id_len = id_len;
        Ok(self)
    }

    /// Sets the max message size.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

/// Per-session state visible from both the actor task and a session handle.
pub(crate) struct SessionState {
    pub(crate) read_queue: BoundedQueue<Vec<u8>>,
    pub(crate) closed: OneShotClose,
}

/// Per-session state for a [`crate::TaggedDemux`] session: as [`SessionState`],
/// plus a `tag_queue` holding one [`Tag`] per queued read payload, captured
/// from the underlying `TaggedConn`'s `read_tagged` call that produced it.
pub(crate) struct TaggedSessionState {
    pub(crate) read_queue: BoundedQueue<Vec<u8>>,
    pub(crate) tag_queue: BoundedQueue<Tag>,
    pub(crate) closed: OneShotClose,
}

/// A snapshot of a [`crate::Demux`]'s or [`crate::DemuxClient`]'s current
/// activity, for observability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DemuxStats {
    /// Number of sessions currently tracked in the session table.
    pub live_sessions: usize,
    /// Number of not-yet-accepted sessions queued (0 for `DemuxClient`,
    /// which has no accept queue).
    pub pending_accepts: usize,
}

/// State shared by the actor task and every session/accept handle.
pub(crate) struct Shared {
    pub(crate) sessions: DashMap<Vec<u8>, Arc<SessionState>>,
    pub(crate) write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>)>,
    pub(crate) config: DemuxConfig,
    pub(crate) shutdown: OneShotClose,
}

impl Shared {
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// State shared by the [`crate::TaggedDemux`] actor task and every tagged
/// session handle. Parallels [`Shared`], but keyed on [`TaggedSessionState`]
/// and carrying the underlying `TaggedConn`'s advertised `MaxWrite`, read
/// once at construction since only the actor task ever touches that `Conn`.
pub(crate) struct TaggedShared {
    pub(crate) sessions: DashMap<Vec<u8>, Arc<TaggedSessionState>>,
    pub(crate) write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>, Tag)>,
    pub(crate) config: DemuxConfig,
    pub(crate) shutdown: OneShotClose,
    pub(crate) inner_max_write: MaxWrite,
}

impl TaggedShared {
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Runs the single actor loop for the lifetime of `conn`. Exits when `conn`
/// errors on read (propagated to every live session by closing its read
/// queue) or when every sender side of `write_rx` has dropped.
pub(crate) async fn run_actor(
    mut conn: Box<dyn Conn>,
    shared: Arc<Shared>,
    mut write_rx: mpsc::Receiver<(Vec<u8>, Vec<u8>)>,
    mut on_unknown_id: impl FnMut(Vec<u8>, Vec<u8>) + Send,
    on_exit: impl std::future::Future<Output = ()> + Send,
) {
    let id_len = shared.config.id_len;
    let mut buf = vec![0u8; shared.config.max_message_size];

    loop {
        tokio::select! {
            biased;

            () = shared.shutdown.wait_closed() => break,

            write_req = write_rx.recv() => {
                match write_req {
                    Some((id, payload)) => {
                        let mut frame = Vec::with_capacity(id.len() + payload.len());
                        frame.extend_from_slice(&id);
                        frame.extend_from_slice(&payload);
                        if conn.write(&frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            read_result = conn.read(&mut buf) => {
                match read_result {
                    Ok(n) if n >= id_len => {
                        let id = buf[..id_len].to_vec();
                        let payload = buf[id_len..n].to_vec();
                        if let Some(session) = shared.sessions.get(&id) {
                            let _ = session.read_queue.producer().try_send(payload);
                        } else {
                            on_unknown_id(id, payload);
                        }
                    }
                    Ok(_) => {
                        // Shorter than one id: framing is lost for the whole
                        // multiplex, not just this packet. The actor terminates
                        // and the demux transitions to closed (spec.md §4.4).
                        #[cfg(feature = "tracing")]
                        tracing::warn!("demux actor received a message shorter than id_len, closing");
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    let sessions: Vec<Arc<SessionState>> = shared
        .sessions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    for session in sessions {
        session.closed.close();
        session.read_queue.close().await;
    }
    shared.shutdown.close();
    on_exit.await;
    let _ = conn.close().await;
}

/// As [`run_actor`], but drives an underlying [`TaggedConn`] for
/// [`crate::TaggedDemux`]: every inbound message's tag is paired with its
/// payload in the owning session's `tag_queue`, and every outbound write
/// replays the tag a session dequeued back through `write_tagged`.
pub(crate) async fn run_tagged_actor(
    mut conn: Box<dyn TaggedConn>,
    shared: Arc<TaggedShared>,
    mut write_rx: mpsc::Receiver<(Vec<u8>, Vec<u8>, Tag)>,
    mut on_unknown_id: impl FnMut(Vec<u8>, Vec<u8>, Tag) + Send,
    on_exit: impl std::future::Future<Output = ()> + Send,
) {
    let id_len = shared.config.id_len;
    let mut buf = vec![0u8; shared.config.max_message_size];

    loop {
        tokio::select! {
            biased;

            () = shared.shutdown.wait_closed() => break,

            write_req = write_rx.recv() => {
                match write_req {
                    Some((id, payload, tag)) => {
                        let mut frame = Vec::with_capacity(id.len() + payload.len());
                        frame.extend_from_slice(&id);
                        frame.extend_from_slice(&payload);
                        if conn.write_tagged(&frame, tag).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            read_result = conn.read_tagged(&mut buf) => {
                match read_result {
                    Ok((n, tag)) if n >= id_len => {
                        let id = buf[..id_len].to_vec();
                        let payload = buf[id_len..n].to_vec();
                        if let Some(session) = shared.sessions.get(&id) {
                            if session.read_queue.try_send(payload) == TrySendOutcome::Sent {
                                let _ = session.tag_queue.try_send(tag);
                            }
                        } else {
                            on_unknown_id(id, payload, tag);
                        }
                    }
                    Ok(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("tagged demux actor received a message shorter than id_len, closing");
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    let sessions: Vec<Arc<TaggedSessionState>> = shared
        .sessions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    for session in sessions {
        session.closed.close();
        session.read_queue.close().await;
        session.tag_queue.close().await;
    }
    shared.shutdown.close();
    on_exit.await;
    let _ = conn.close().await;
}
