//! State and the per-sub-connection actor task shared by [`crate::Mux`].
//!
//! Per Design Notes §9 ("Arena-and-id for sub-connections"), a sub-connection
//! is never referenced by a cyclic back-pointer: it is owned exclusively by
//! its own actor task, looked up through an id-keyed arena, and addressed
//! from the outside only by that stable `u64` id carried in
//! [`netx_core::Tag::OriginConn`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, OneShotClose};

/// Configuration for a [`crate::Mux`].
#[derive(Clone, Copy, Debug)]
pub struct MuxConfig {
    /// Per-sub-connection read buffer size.
    pub buf_size: usize,
    /// Capacity of the shared `read_tagged` queue and each sub-connection's
    /// outbound write channel.
    pub queue_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            buf_size: 4 * 1024,
            queue_capacity: 64,
        }
    }
}

impl MuxConfig {
    /// Starts a builder with a 4 KiB read buffer and a 64-entry queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-sub-connection read buffer size.
    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

/// An arena entry: the handle the outside world uses to reach a live
/// sub-connection's owning actor task without touching the `Conn` itself.
pub(crate) struct SubConnHandle {
    pub(crate) write_tx: mpsc::Sender<Vec<u8>>,
    pub(crate) closed: OneShotClose,
}

/// A snapshot of a [`crate::Mux`]'s currently tracked sub-connections.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MuxStats {
    /// Number of sub-connections the arena currently tracks.
    pub live_sub_conns: usize,
}

pub(crate) struct Shared {
    pub(crate) sub_conns: DashMap<u64, Arc<SubConnHandle>>,
    pub(crate) next_id: AtomicU64,
    pub(crate) read_queue: BoundedQueue<(Vec<u8>, u64)>,
    pub(crate) shutdown: OneShotClose,
}

impl Shared {
    pub(crate) fn live_count(&self) -> usize {
        self.sub_conns.len()
    }
}

/// Runs the actor for one accepted sub-connection: select over an inbound
/// read, a queued outbound write request, and the shared shutdown signal.
/// This task is the sole owner of `conn` for its whole lifetime, so a reply
/// write never has to contend with the blocking read that is waiting for
/// the next request on the same sub-connection.
pub(crate) async fn run_sub_conn(
    id: u64,
    mut conn: Box<dyn Conn>,
    handle: Arc<SubConnHandle>,
    shared: Arc<Shared>,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    buf_size: usize,
) {
    let mut buf = vec![0u8; buf_size];
    loop {
        tokio::select! {
            biased;

            () = handle.closed.wait_closed() => break,

            write_req = write_rx.recv() => {
                match write_req {
                    Some(payload) => {
                        if conn.write(&payload).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            read_result = conn.read(&mut buf) => {
                match read_result {
                    Ok(n) => {
                        let _ = shared.read_queue.try_send((buf[..n].to_vec(), id));
                    }
                    Err(_) => break,
                }
            }
        }
    }
    shared.sub_conns.remove(&id);
    handle.closed.close();
    let _ = conn.close().await;
}
