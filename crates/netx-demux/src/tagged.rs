//! [`TaggedDemux`]: identical to [`crate::Demux`] but driven over a
//! [`TaggedConn`] instead of a plain [`Conn`]. Every session the actor hands
//! out is a [`TaggedDemuxSession`] whose `tag_queue` captures the underlying
//! transport's tag on each `read_tagged` and replays it, in FIFO order, on
//! the matching `write` — so a reply can be routed back through whatever the
//! `TaggedConn` below needs (e.g. the DNS tunnel server's `DnsRequest` tag)
//! without the session itself knowing what a tag means.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{
    BoundedQueue, Conn, Deadline, Deadlines, Error, Listener, MaxWrite, OneShotClose, Result, Tag, TaggedConn,
    TrySendOutcome,
};

use crate::shared::{DemuxConfig, DemuxStats, TaggedSessionState, TaggedShared};

/// Splits one underlying [`TaggedConn`] into many independently
/// readable/writable sessions, keyed by an id prefix each message carries,
/// the same way [`crate::Demux`] does over a plain [`Conn`].
pub struct TaggedDemux {
    shared: Arc<TaggedShared>,
    accept_queue: Arc<BoundedQueue<TaggedDemuxSession>>,
    never: Deadline,
}

impl TaggedDemux {
    /// Spawns the actor task over `inner` and returns the `Listener` half.
    pub fn new(inner: Box<dyn TaggedConn>, config: DemuxConfig) -> Self {
        let inner_max_write = inner.max_write();
        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(TaggedShared {
            sessions: dashmap::DashMap::new(),
            write_tx: write_tx.clone(),
            config,
            shutdown: OneShotClose::new(),
            inner_max_write,
        });
        let accept_queue = Arc::new(BoundedQueue::new(config.queue_capacity));

        let actor_shared = shared.clone();
        let actor_accept_queue = accept_queue.clone();
        let on_unknown_id = move |id: Vec<u8>, payload: Vec<u8>, tag: Tag| {
            let state = Arc::new(TaggedSessionState {
                read_queue: BoundedQueue::new(actor_shared.config.queue_capacity),
                tag_queue: BoundedQueue::new(actor_shared.config.queue_capacity),
                closed: OneShotClose::new(),
            });
            let _ = state.read_queue.producer().try_send(payload);
            let _ = state.tag_queue.producer().try_send(tag);
            let session = TaggedDemuxSession::new(
                id.clone(),
                state.clone(),
                actor_shared.write_tx.clone(),
                actor_shared.inner_max_write,
                actor_shared.config.id_len,
            );
            if actor_accept_queue.try_send(session) == TrySendOutcome::Sent {
                actor_shared.sessions.insert(id, state);
            }
        };

        let exit_accept_queue = accept_queue.clone();
        tokio::spawn(crate::shared::run_tagged_actor(
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
impl Listener for TaggedDemux {
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

/// One tagged multiplexed session's `Conn` endpoint. A `read()` dequeues a
/// payload the same way [`crate::DemuxSession`] does; the paired tag the
/// underlying `TaggedConn` produced alongside it waits in `tag_queue` until
/// the matching `write()` call dequeues it to pass back to `write_tagged`.
pub struct TaggedDemuxSession {
    pub(crate) id: Vec<u8>,
    pub(crate) state: Arc<TaggedSessionState>,
    pub(crate) write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>, Tag)>,
    pub(crate) deadlines: Deadlines,
    never: Deadline,
    inner_max_write: MaxWrite,
    id_len: usize,
    pending: Vec<u8>,
    pending_offset: usize,
}

impl TaggedDemuxSession {
    pub(crate) fn new(
        id: Vec<u8>,
        state: Arc<TaggedSessionState>,
        write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>, Tag)>,
        inner_max_write: MaxWrite,
        id_len: usize,
    ) -> Self {
        Self {
            id,
            state,
            write_tx,
            deadlines: Deadlines::new(),
            never: Deadline::new(),
            inner_max_write,
            id_len,
            pending: Vec::new(),
            pending_offset: 0,
        }
    }

    /// This session's id, as assigned by the actor on first sight.
    pub fn id(&self) -> &[u8] {
        &self.id
    }
}

/// Dequeues the next captured tag and forwards `(id, payload, tag)` to the
/// actor. A free function (rather than a method) so the borrow of
/// `state`/`write_tx`/`never` it needs is disjoint from the `self.deadlines`
/// borrow `TaggedDemuxSession::write` takes to race it.
async fn send_tagged(
    state: &TaggedSessionState,
    write_tx: &mpsc::Sender<(Vec<u8>, Vec<u8>, Tag)>,
    never: &Deadline,
    id: Vec<u8>,
    payload: Vec<u8>,
) -> Result<()> {
    let tag = state.tag_queue.recv(never).await?;
    write_tx.send((id, payload, tag)).await.map_err(|_| Error::Closed)
}

#[async_trait]
impl Conn for TaggedDemuxSession {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending_offset >= self.pending.len() {
            let message = self
                .deadlines
                .race_read(self.state.read_queue.recv(&self.never))
                .await??;
            self.pending = message;
            self.pending_offset = 0;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }
        let remaining = &self.pending[self.pending_offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pending_offset += n;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.state.closed.is_closed() {
            return Err(Error::Closed);
        }
        let id = self.id.clone();
        let payload = buf.to_vec();
        self.deadlines
            .race_write(send_tagged(&self.state, &self.write_tx, &self.never, id, payload))
            .await??;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state.closed.close() {
            self.state.read_queue.close().await;
            self.state.tag_queue.close().await;
        }
        Ok(())
    }

    fn max_write(&self) -> MaxWrite {
        if self.inner_max_write == 0 {
            0
        } else {
            self.inner_max_write.saturating_sub(self.id_len as u16)
        }
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.overall.set(when);
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.read.set(when);
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.write.set(when);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::{PacketConn, TaggedPacketConn};

    fn id_bytes(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    #[tokio::test]
    async fn accepts_a_new_session_on_first_message() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = TaggedDemux::new(Box::new(TaggedPacketConn::new(b)), DemuxConfig::new());

        let mut id_and_payload = id_bytes(7);
        id_and_payload.extend_from_slice(b"hello");
        peer.write(&id_and_payload).await.unwrap();

        let mut session = demux.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn session_write_replays_the_tag_captured_by_its_read() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = TaggedDemux::new(
            Box::new(TaggedPacketConn::tagging(b, |n| Tag::OriginConn(n as u64))),
            DemuxConfig::new(),
        );

        let mut open = id_bytes(3);
        open.extend_from_slice(b"open");
        peer.write(&open).await.unwrap();

        let mut session = demux.accept().await.unwrap();
        let mut buf = [0u8; 16];
        session.read(&mut buf).await.unwrap();
        session.write(b"reply").await.unwrap();

        let mut wire = [0u8; 16];
        let n = peer.read(&mut wire).await.unwrap();
        assert_eq!(&wire[..4], &id_bytes(3)[..]);
        assert_eq!(&wire[4..n], b"reply");
    }

    #[tokio::test]
    async fn tags_pair_with_reads_in_fifo_order_across_several_messages() {
        let (mut peer, b) = PacketConn::pair(8);
        let (tagged_conn, written_tags) =
            TaggedPacketConn::recording(b, |n| Tag::OriginConn(n as u64));
        let mut demux = TaggedDemux::new(Box::new(tagged_conn), DemuxConfig::new());

        let mut first = id_bytes(1);
        first.extend_from_slice(b"a");
        peer.write(&first).await.unwrap();
        let mut session = demux.accept().await.unwrap();

        let mut second = id_bytes(1);
        second.extend_from_slice(b"b");
        peer.write(&second).await.unwrap();

        let mut buf = [0u8; 16];
        session.read(&mut buf).await.unwrap();
        session.read(&mut buf).await.unwrap();

        // Two reads happened, capturing OriginConn(0) then OriginConn(1).
        // Writing the *second* payload first must still dequeue the tag in
        // capture order (OriginConn(0)), not the order the writes occurred.
        session.write(b"reply-b").await.unwrap();
        session.write(b"reply-a").await.unwrap();

        let mut wire = [0u8; 16];
        peer.read(&mut wire).await.unwrap();
        peer.read(&mut wire).await.unwrap();

        let tags = written_tags.lock().unwrap();
        assert_eq!(tags.len(), 2);
        assert!(matches!(tags[0], Tag::OriginConn(0)));
        assert!(matches!(tags[1], Tag::OriginConn(1)));
    }

    #[tokio::test]
    async fn max_write_is_reduced_by_id_len() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = TaggedDemux::new(Box::new(TaggedPacketConn::with_max_write(b, 100)), DemuxConfig::new());
        let mut open = id_bytes(1);
        open.extend_from_slice(b"x");
        peer.write(&open).await.unwrap();
        let session = demux.accept().await.unwrap();
        assert_eq!(session.max_write(), 100 - DemuxConfig::new().id_len as u16);
    }

    #[tokio::test]
    async fn max_write_stays_zero_when_unadvertised() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = TaggedDemux::new(Box::new(TaggedPacketConn::new(b)), DemuxConfig::new());
        let mut open = id_bytes(1);
        open.extend_from_slice(b"x");
        peer.write(&open).await.unwrap();
        let session = demux.accept().await.unwrap();
        assert_eq!(session.max_write(), 0);
    }

    #[tokio::test]
    async fn stats_report_live_sessions() {
        let (mut peer, b) = PacketConn::pair(8);
        let mut demux = TaggedDemux::new(Box::new(TaggedPacketConn::new(b)), DemuxConfig::new());
        assert_eq!(demux.stats().live_sessions, 0);

        let mut open = id_bytes(1);
        open.extend_from_slice(b"x");
        peer.write(&open).await.unwrap();
        let _session = demux.accept().await.unwrap();
        assert_eq!(demux.stats().live_sessions, 1);
    }
}
