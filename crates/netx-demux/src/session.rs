//! [`DemuxSession`]: the per-session `Conn` handed out by [`crate::Demux`]'s
//! `accept()` and [`crate::DemuxClient`]'s `dial()`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{Conn, Deadline, Deadlines, Error, Result};

use crate::shared::SessionState;

/// One multiplexed session's `Conn` endpoint.
pub struct DemuxSession {
    pub(crate) id: Vec<u8>,
    pub(crate) state: Arc<SessionState>,
    pub(crate) write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>)>,
    pub(crate) deadlines: Deadlines,
    /// Always-unset deadline passed to [`netx_core::BoundedQueue::recv`],
    /// which requires one; the real read deadline is enforced by racing the
    /// whole `recv` future through [`Deadlines::race_read`] instead.
    never: Deadline,
    pending: Vec<u8>,
    pending_offset: usize,
}

impl DemuxSession {
    pub(crate) fn new(
        id: Vec<u8>,
        state: Arc<SessionState>,
        write_tx: mpsc::Sender<(Vec<u8>, Vec<u8>)>,
    ) -> Self {
        Self {
            id,
            state,
            write_tx,
            deadlines: Deadlines::new(),
            never: Deadline::new(),
            pending: Vec::new(),
            pending_offset: 0,
        }
    }

    /// This session's id, as assigned at open time.
    pub fn id(&self) -> &[u8] {
        &self.id
    }
}

#[async_trait]
impl Conn for DemuxSession {
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
        self.deadlines
            .race_write(self.write_tx.send((self.id.clone(), buf.to_vec())))
            .await?
            .map_err(|_| Error::Closed)?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state.closed.close() {
            self.state.read_queue.close().await;
        }
        Ok(())
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
    use netx_core::{BoundedQueue, OneShotClose};

    fn fresh_session() -> (DemuxSession, mpsc::Receiver<(Vec<u8>, Vec<u8>)>) {
        let state = Arc::new(SessionState {
            read_queue: BoundedQueue::new(4),
            closed: OneShotClose::new(),
        });
        let (tx, rx) = mpsc::channel(4);
        (DemuxSession::new(vec![1, 2, 3, 4], state, tx), rx)
    }

    #[tokio::test]
    async fn write_forwards_id_and_payload_to_the_actor_channel() {
        let (mut session, mut rx) = fresh_session();
        session.write(b"payload").await.unwrap();
        let (id, payload) = rx.recv().await.unwrap();
        assert_eq!(id, vec![1, 2, 3, 4]);
        assert_eq!(payload, b"payload");
    }

    #[tokio::test]
    async fn read_buffers_a_message_across_small_reads() {
        let (mut session, _rx) = fresh_session();
        session.state.read_queue.producer().send(b"0123456789".to_vec()).await.unwrap();

        let mut small = [0u8; 4];
        let n1 = session.read(&mut small).await.unwrap();
        assert_eq!(&small[..n1], b"0123");
        let n2 = session.read(&mut small).await.unwrap();
        assert_eq!(&small[..n2], b"4567");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drains_queue_to_eof() {
        let (mut session, _rx) = fresh_session();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.state.closed.is_closed());

        let err = session.read(&mut [0u8; 4]).await.unwrap_err();
        assert!(matches!(err, Error::Eof));
    }
}
