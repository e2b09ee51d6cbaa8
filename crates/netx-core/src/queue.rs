use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex, Notify};

use crate::{Deadline, Error, Result};

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrySendOutcome {
    /// The value was enqueued.
    Sent,
    /// The queue was at capacity (or already closed); the value was
    /// dropped. This is the documented, intentional backpressure policy:
    /// read loops never block on a full session/accept queue.
    Dropped,
}

/// A bounded, multi-producer single-consumer queue that never blocks on
/// enqueue: a full queue drops the new value rather than stalling whatever
/// read loop is producing into it. This is the shared primitive behind
/// Demux's per-session `read_queue`/`tag_queue`, its `accept_queue`, and
/// PollConn/PollServerConn's `send_queue`/`recv_queue`.
pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    closed: OneShotClose,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a queue with room for `capacity` buffered values (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: OneShotClose::new(),
        }
    }

    /// A cloneable producer handle for feeding this queue from a read loop.
    pub fn producer(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Attempts to enqueue `value` without blocking. Always drops once the
    /// queue has been [`BoundedQueue::close`]d.
    pub fn try_send(&self, value: T) -> TrySendOutcome {
        if self.closed.is_closed() {
            return TrySendOutcome::Dropped;
        }
        match self.tx.try_send(value) {
            Ok(()) => TrySendOutcome::Sent,
            Err(_) => TrySendOutcome::Dropped,
        }
    }

    /// Dequeues one value, racing the given deadline. Returns
    /// [`Error::Eof`] once the queue has been closed and fully drained.
    ///
    /// The receiver lock is acquired only inside the first `select!` branch
    /// below, never held across the whole call: if [`BoundedQueue::close`]
    /// fires while a caller is parked here with no buffered value and no
    /// deadline set, the second branch wins, the first branch (and the
    /// `MutexGuard` it was holding) is dropped, and this returns
    /// [`Error::Eof`] immediately instead of leaving `close()` waiting
    /// forever on a lock this call would otherwise hold indefinitely.
    pub async fn recv(&self, deadline: &Deadline) -> Result<T> {
        tokio::select! {
            biased;
            out = async {
                let mut rx = self.rx.lock().await;
                deadline.race(rx.recv()).await
            } => {
                match out? {
                    Some(value) => Ok(value),
                    None => Err(Error::Eof),
                }
            }
            () = self.closed.wait_closed() => Err(Error::Eof),
        }
    }

    /// Closes the queue: no further [`BoundedQueue::try_send`] succeeds, and
    /// any [`BoundedQueue::recv`] parked with nothing buffered wakes
    /// immediately with [`Error::Eof`] rather than needing this call to take
    /// the receiver lock. A value already buffered ahead of a closed queue
    /// still drains through one more `recv()` first, since that call's
    /// `rx.recv()` branch is checked before the `closed` one.
    pub async fn close(&self) {
        self.closed.close();
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }
}

/// A one-shot close flag plus a notifier, guarding against the double-close
/// race spec.md calls out for Demux sessions under a racing demux `Close`.
#[derive(Debug, Default)]
pub struct OneShotClose {
    closed: AtomicBool,
    notify: Notify,
}

impl OneShotClose {
    /// Creates a fresh, open flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this endpoint has already been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the flag. Returns `true` the first time it is called and
    /// `false` on every subsequent call, so callers can run teardown logic
    /// exactly once even under concurrent close attempts.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.swap(true, Ordering::AcqRel);
        if !was_closed {
            self.notify.notify_waiters();
        }
        !was_closed
    }

    /// Waits until this flag is closed.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_queue_drops_on_full() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert_eq!(queue.try_send(1), TrySendOutcome::Sent);
        assert_eq!(queue.try_send(2), TrySendOutcome::Dropped);

        let deadline = Deadline::new();
        assert_eq!(queue.recv(&deadline).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bounded_queue_reports_eof_once_closed_and_drained() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(4);
        queue.try_send(9);
        queue.close().await;

        let deadline = Deadline::new();
        assert_eq!(queue.recv(&deadline).await.unwrap(), 9);
        assert!(matches!(queue.recv(&deadline).await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn close_wakes_a_recv_parked_with_no_deadline_and_no_data() {
        let queue = std::sync::Arc::new(BoundedQueue::<u8>::new(4));
        let never = std::sync::Arc::new(Deadline::new());

        let waiter = {
            let queue = queue.clone();
            let never = never.clone();
            tokio::spawn(async move { queue.recv(&never).await })
        };
        tokio::task::yield_now().await;

        queue.close().await;

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("recv should wake once close() runs, not hang on the receiver lock")
            .unwrap();
        assert!(matches!(result, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn one_shot_close_runs_teardown_exactly_once() {
        let flag = OneShotClose::new();
        assert!(flag.close());
        assert!(!flag.close());
        assert!(flag.is_closed());
    }

    #[tokio::test]
    async fn one_shot_close_wakes_waiters() {
        let flag = std::sync::Arc::new(OneShotClose::new());
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait_closed().await })
        };
        tokio::task::yield_now().await;
        flag.close();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
