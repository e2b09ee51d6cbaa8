//! [`Mux`]: a `Listener -> TaggedConn` wrapper. Every accepted sub-connection
//! gets its own actor task (see [`crate::shared::run_sub_conn`]); reads from
//! any of them surface through one `read_tagged` call tagged with the
//! originating sub-connection's arena id, and `write_tagged` routes a reply
//! back to that exact sub-connection.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Deadline, Deadlines, Error, Listener, OneShotClose, Result, Tag, TaggedConn};

use crate::shared::{MuxConfig, MuxStats, Shared, SubConnHandle};

/// Adapts a [`netx_core::Listener`] into a single [`TaggedConn`] whose tag
/// identifies the originating sub-connection.
pub struct Mux {
    shared: Arc<Shared>,
    deadlines: Deadlines,
    never: Deadline,
}

impl Mux {
    /// Spawns the accept loop over `listener` and returns the `TaggedConn`
    /// half. Each accepted sub-connection is handed its own actor task; a
    /// deadline set here applies only to the *next* `read_tagged` call, not
    /// to any sub-connection's in-flight read.
    pub fn new(listener: Box<dyn Listener>, config: MuxConfig) -> Self {
        let shared = Arc::new(Shared {
            sub_conns: dashmap::DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
            read_queue: BoundedQueue::new(config.queue_capacity),
            shutdown: OneShotClose::new(),
        });

        tokio::spawn(run_accept_loop(listener, shared.clone(), config));

        Self {
            shared,
            deadlines: Deadlines::new(),
            never: Deadline::new(),
        }
    }

    /// A snapshot of currently tracked sub-connections.
    pub fn stats(&self) -> MuxStats {
        MuxStats {
            live_sub_conns: self.shared.live_count(),
        }
    }
}

async fn run_accept_loop(mut listener: Box<dyn Listener>, shared: Arc<Shared>, config: MuxConfig) {
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.wait_closed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok(conn) => {
                        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                        let (write_tx, write_rx) = mpsc::channel(config.queue_capacity);
                        let handle = Arc::new(SubConnHandle {
                            write_tx,
                            closed: OneShotClose::new(),
                        });
                        shared.sub_conns.insert(id, handle.clone());
                        tokio::spawn(crate::shared::run_sub_conn(
                            id,
                            conn,
                            handle,
                            shared.clone(),
                            write_rx,
                            config.buf_size,
                        ));
                    }
                    Err(_) => break,
                }
            }
        }
    }
    shared.shutdown.close();
    for entry in shared.sub_conns.iter() {
        entry.value().closed.close();
    }
    shared.read_queue.close().await;
    let _ = listener.close().await;
}

fn origin_id_from_tag(tag: &Tag) -> Option<u64> {
    match tag {
        Tag::OriginConn(id) => Some(*id),
        Tag::Composite { inner, .. } => origin_id_from_tag(inner),
        _ => None,
    }
}

#[async_trait]
impl TaggedConn for Mux {
    async fn read_tagged(&mut self, buf: &mut [u8]) -> Result<(usize, Tag)> {
        let (payload, id) = self.deadlines.race_read(self.shared.read_queue.recv(&self.never)).await??;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, Tag::OriginConn(id)))
    }

    async fn write_tagged(&mut self, buf: &[u8], tag: Tag) -> Result<usize> {
        let Some(id) = origin_id_from_tag(&tag) else {
            return Err(Error::invalid_tag("Mux::write_tagged requires an OriginConn tag"));
        };
        let handle = self
            .shared
            .sub_conns
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::invalid_tag(format!("sub-connection {id} is not live")))?;
        self.deadlines
            .race_write(handle.write_tx.send(buf.to_vec()))
            .await?
            .map_err(|_| Error::invalid_tag(format!("sub-connection {id} closed mid-write")))?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.shutdown.close();
        for entry in self.shared.sub_conns.iter() {
            entry.value().closed.close();
        }
        self.shared.read_queue.close().await;
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
    use netx_core::test_support::in_memory_pair;
    use netx_core::Conn;

    #[tokio::test]
    async fn read_tagged_reports_the_originating_sub_connection() {
        let (listener, dialer) = in_memory_pair(4, 256);
        let mut mux = Mux::new(Box::new(listener), MuxConfig::new());

        let mut c1 = dialer.dial().await.unwrap();
        c1.write(b"from c1").await.unwrap();

        let (n, tag) = mux.read_tagged(&mut [0u8; 32]).await.unwrap();
        assert_eq!(n, 7);
        assert!(matches!(tag, Tag::OriginConn(_)));
    }

    #[tokio::test]
    async fn write_tagged_replies_on_the_exact_sub_connection() {
        let (listener, dialer) = in_memory_pair(4, 256);
        let mut mux = Mux::new(Box::new(listener), MuxConfig::new());

        let mut c1 = dialer.dial().await.unwrap();
        let mut c2 = dialer.dial().await.unwrap();
        c1.write(b"ping-c1").await.unwrap();
        c2.write(b"ping-c2").await.unwrap();

        let mut seen = std::collections::HashMap::new();
        for _ in 0..2 {
            let mut buf = [0u8; 32];
            let (n, tag) = mux.read_tagged(&mut buf).await.unwrap();
            seen.insert(buf[..n].to_vec(), tag);
        }

        let tag_for_c1 = seen.get(b"ping-c1".as_slice()).unwrap().clone();
        mux.write_tagged(b"pong-for-c1", tag_for_c1).await.unwrap();

        let mut reply = [0u8; 32];
        let n = c1.read(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"pong-for-c1");
    }

    #[tokio::test]
    async fn write_tagged_rejects_a_dead_sub_connection_id() {
        let (listener, _dialer) = in_memory_pair(4, 256);
        let mut mux = Mux::new(Box::new(listener), MuxConfig::new());
        let err = mux.write_tagged(b"x", Tag::OriginConn(999)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTag { .. }));
    }

    #[tokio::test]
    async fn write_tagged_rejects_the_wrong_tag_shape() {
        let (listener, _dialer) = in_memory_pair(4, 256);
        let mut mux = Mux::new(Box::new(listener), MuxConfig::new());
        let err = mux.write_tagged(b"x", Tag::None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTag { .. }));
    }

    #[tokio::test]
    async fn stats_report_live_sub_conns() {
        let (listener, dialer) = in_memory_pair(4, 256);
        let mut mux = Mux::new(Box::new(listener), MuxConfig::new());
        assert_eq!(mux.stats().live_sub_conns, 0);

        let mut c1 = dialer.dial().await.unwrap();
        c1.write(b"hello").await.unwrap();
        let _ = mux.read_tagged(&mut [0u8; 32]).await.unwrap();
        assert_eq!(mux.stats().live_sub_conns, 1);
    }
}
