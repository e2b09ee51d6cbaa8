//! [`PollServerConn`]: the server side of the poll bridge, a `Conn -> Conn`
//! wrapper symmetric to [`crate::PollConn`]. Every inbound request is
//! answered immediately, non-blockingly drawing from whatever response the
//! application has queued (or an empty one if nothing is pending).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use netx_core::{BoundedQueue, Conn, Deadline, Deadlines, Error, OneShotClose, Result};

/// Configuration for a [`PollServerConn`].
#[derive(Clone, Copy, Debug)]
pub struct PollServerConfig {
    /// Capacity of the outbound (response) queue.
    pub send_queue_cap: usize,
    /// Capacity of the inbound (request) queue.
    pub recv_queue_cap: usize,
    /// Read buffer size for one request.
    pub buf_size: usize,
    /// If set, a poll cycle that receives no request within this long fails
    /// the worker. Referenced in spec.md §9's Open Questions as
    /// `WithPollTimeout`; off (`None`) by default.
    pub idle_timeout: Option<Duration>,
}

impl Default for PollServerConfig {
    fn default() -> Self {
        Self {
            send_queue_cap: 32,
            recv_queue_cap: 32,
            buf_size: 4 * 1024,
            idle_timeout: None,
        }
    }
}

impl PollServerConfig {
    /// Starts a builder with 32-entry queues and no idle timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both queue capacities.
    pub fn with_queue_caps(mut self, send_queue_cap: usize, recv_queue_cap: usize) -> Self {
        self.send_queue_cap = send_queue_cap;
        self.recv_queue_cap = recv_queue_cap;
        self
    }

    /// Sets the idle timeout: if no request arrives within `timeout`, the
    /// worker terminates and subsequent reads/writes fail.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

/// The server-side complement to [`crate::PollConn`]. Each poll cycle reads
/// one request and immediately writes back one response.
pub struct PollServerConn {
    send_tx: mpsc::Sender<Vec<u8>>,
    recv_queue: Arc<BoundedQueue<Vec<u8>>>,
    deadlines: Deadlines,
    never: Deadline,
    closed: Arc<OneShotClose>,
    pending: Vec<u8>,
    pending_offset: usize,
}

impl PollServerConn {
    /// Spawns the worker over `inner` and returns the bridged `Conn`.
    pub fn new(inner: Box<dyn Conn>, config: PollServerConfig) -> Self {
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
    config: PollServerConfig,
) {
    let mut buf = vec![0u8; config.buf_size];
    loop {
        let read_outcome = tokio::select! {
            biased;
            () = closed.wait_closed() => break,
            outcome = read_one_request(&mut *conn, &mut buf, config.idle_timeout) => outcome,
        };

        match read_outcome {
            Ok(n) => {
                if n > 0 && recv_queue.producer().send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }

        let response = send_rx.try_recv().unwrap_or_default();
        if conn.write(&response).await.is_err() {
            break;
        }
    }
    closed.close();
    recv_queue.close().await;
    let _ = conn.close().await;
}

async fn read_one_request(conn: &mut dyn Conn, buf: &mut [u8], idle_timeout: Option<Duration>) -> Result<usize> {
    match idle_timeout {
        Some(timeout) => tokio::time::timeout(timeout, conn.read(buf))
            .await
            .map_err(|_| Error::DeadlineExceeded)?,
        None => conn.read(buf).await,
    }
}

#[async_trait]
impl Conn for PollServerConn {
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
    use crate::client::{PollConfig, PollConn};
    use netx_core::test_support::PacketConn;

    #[tokio::test]
    async fn request_is_answered_in_the_same_poll_cycle() {
        let (client_side, server_side) = PacketConn::pair(8);
        let client = PollConn::new(Box::new(client_side), PollConfig::new().with_poll_interval(Duration::from_millis(20)));
        let mut server = PollServerConn::new(Box::new(server_side), PollServerConfig::new());

        let mut client = client;
        client.write(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.write(b"pong").await.unwrap();
        let mut reply = [0u8; 16];
        let rn = client.read(&mut reply).await.unwrap();
        assert_eq!(&reply[..rn], b"pong");
    }

    #[tokio::test]
    async fn idle_timeout_fails_the_worker_within_five_periods() {
        let (_client_side, server_side) = PacketConn::pair(8);
        let tau = Duration::from_millis(20);
        let mut server = PollServerConn::new(Box::new(server_side), PollServerConfig::new().with_poll_timeout(tau));

        let result = tokio::time::timeout(tau * 5, server.read(&mut [0u8; 16])).await;
        let err = result.expect("worker should fail within 5*tau").unwrap_err();
        assert!(matches!(err, Error::Eof));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_client_side, server_side) = PacketConn::pair(8);
        let mut server = PollServerConn::new(Box::new(server_side), PollServerConfig::new());
        server.close().await.unwrap();
        server.close().await.unwrap();
        let err = server.write(b"x").await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
