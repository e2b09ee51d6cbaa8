//! [`PollConn`]: the client side of the poll bridge, a `Conn -> Conn`
//! wrapper that turns a strict request/response datagram channel into
//! something that looks like a persistent stream with server-initiated
//! pushes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, Deadline, Deadlines, Error, OneShotClose, Result};

/// Configuration for a [`PollConn`].
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    /// Capacity of the outbound queue `Write` pushes onto.
    pub send_queue_cap: usize,
    /// Capacity of the inbound queue the worker fills from each poll cycle.
    pub recv_queue_cap: usize,
    /// How often the worker polls when nothing is queued to send.
    pub poll_interval: Duration,
    /// Read buffer size for one poll cycle's response.
    pub buf_size: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            send_queue_cap: 32,
            recv_queue_cap: 32,
            poll_interval: Duration::from_millis(100),
            buf_size: 4 * 1024,
        }
    }
}

impl PollConfig {
    /// Starts a builder with 32-entry queues and a 100ms poll interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both queue capacities.
    pub fn with_queue_caps(mut self, send_queue_cap: usize, recv_queue_cap: usize) -> Self {
        self.send_queue_cap = send_queue_cap;
        self.recv_queue_cap = recv_queue_cap;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Adapts a strict request/response [`Conn`] into a persistent one. A
/// background worker writes whatever is queued (or an empty keep-alive) on
/// every `poll_interval` tick, then reads exactly one response and queues it
/// for [`PollConn::read`].
pub struct PollConn {
    send_tx: mpsc::Sender<Vec<u8>>,
    recv_queue: Arc<BoundedQueue<Vec<u8>>>,
    deadlines: Deadlines,
    never: Deadline,
    closed: Arc<OneShotClose>,
    pending: Vec<u8>,
    pending_offset: usize,
}

impl PollConn {
    /// Spawns the worker over `inner` and returns the bridged `Conn`.
    pub fn new(inner: Box<dyn Conn>, config: PollConfig) -> Self {
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_cap);
        let recv_queue = Arc::new(BoundedQueue::new(config.recv_queue_cap));
        let closed = Arc::new(OneShotClose::new());

        tokio::spawn(run_worker(inner, send_rx, recv_queue.clone(), closed.clone(), config));

        Self {
            send_tx,
            recv_queue,
            deadlines: Deadlines::new(),
            never: Deadline::new(),
            closed,
            pending: Vec::new(),
            pending_offset: 0,
        }
    }
}

async fn run_worker(
    mut conn: Box<dyn Conn>,
    mut send_rx: mpsc::Receiver<Vec<u8>>,
    recv_queue: Arc<BoundedQueue<Vec<u8>>>,
    closed: Arc<OneShotClose>,
    config: PollConfig,
) {
    let mut buf = vec![0u8; config.buf_size];
    loop {
        let payload = tokio::select! {
            biased;
            () = closed.wait_closed() => break,
            queued = send_rx.recv() => match queued {
                Some(payload) => payload,
                None => break,
            },
            () = tokio::time::sleep(config.poll_interval) => Vec::new(),
        };

        if conn.write(&payload).await.is_err() {
            break;
        }
        match conn.read(&mut buf).await {
            Ok(0) => {}
            Ok(n) => {
                if recv_queue.producer().send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    closed.close();
    recv_queue.close().await;
    let _ = conn.close().await;
}

#[async_trait]
impl Conn for PollConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending_offset >= self.pending.len() {
            let message = self.deadlines.race_read(self.recv_queue.recv(&self.never)).await??;
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
        if self.closed.is_closed() {
            return Err(Error::Closed);
        }
        self.deadlines
            .race_write(self.send_tx.send(buf.to_vec()))
            .await?
            .map_err(|_| Error::Closed)?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed.close() {
            self.recv_queue.close().await;
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
    use netx_core::test_support::PacketConn;

    #[tokio::test]
    async fn server_push_arrives_within_two_poll_intervals() {
        let (mut server, client_side) = PacketConn::pair(8);
        let config = PollConfig::new().with_poll_interval(Duration::from_millis(20));
        let mut client = PollConn::new(Box::new(client_side), config);

        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let _ = server.read(&mut buf).await.unwrap();
            server.write(b"welcome").await.unwrap();
        });

        let got = tokio::time::timeout(Duration::from_millis(200), async {
            let mut buf = [0u8; 16];
            let n = client.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        })
        .await
        .expect("push should arrive within the timeout");
        assert_eq!(got, b"welcome");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_delivering() {
        let (_server, client_side) = PacketConn::pair(8);
        let mut client = PollConn::new(Box::new(client_side), PollConfig::new());
        client.close().await.unwrap();
        client.close().await.unwrap();
        let err = client.write(b"x").await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
