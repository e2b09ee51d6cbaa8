use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Notify;

use crate::{Error, Result};

/// A single deadline: an epoch-valued cell plus a [`Notify`] that wakes any
/// sleeper when the deadline is changed, per Design Notes §9 in
/// `SPEC_FULL.md` ("Deadline change notification"). This replaces setting an
/// OS-level socket timeout, which cannot be woken on a mid-wait change and
/// is the root cause of the "deadline lost on redial" bug `MuxClient` must
/// otherwise guard against by hand.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Mutex<Option<Instant>>,
    changed: Notify,
}

impl Deadline {
    /// Creates a deadline with no expiry set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or clears, with `None`) the deadline and wakes any sleeper
    /// currently racing it.
    pub fn set(&self, when: Option<Instant>) {
        let mut guard = self.at.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard = when;
        drop(guard);
        self.changed.notify_waiters();
    }

    /// The currently configured deadline, if any.
    pub fn get(&self) -> Option<Instant> {
        *self.at.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Races `fut` against this deadline. If the deadline is changed while
    /// `fut` is still pending, the race restarts against the new deadline
    /// instead of firing against a stale one.
    ///
    /// The wait for a change is registered (via [`tokio::sync::Notify::enable`])
    /// before this reads the current deadline with [`Deadline::get`], the same
    /// guard [`crate::OneShotClose::wait_closed`] applies: otherwise a `set()`
    /// landing between the `get()` read and the `notified()` registration
    /// calls `notify_waiters()` with nothing registered yet, the wake is
    /// lost, and the sleeper waits out the stale deadline instead.
    pub async fn race<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let sleep = sleep_until_opt(self.get());
            tokio::pin!(sleep);
            tokio::select! {
                biased;
                out = &mut fut => return Ok(out),
                () = &mut notified => continue,
                () = &mut sleep => return Err(Error::DeadlineExceeded),
            }
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(instant) => tokio::time::sleep_until(tokio::time::Instant::from_std(instant)).await,
        None => std::future::pending().await,
    }
}

/// The three independent deadlines every [`crate::Conn`] tracks: overall,
/// read, and write. A read races the tighter of `overall` and `read`; a
/// write races the tighter of `overall` and `write`.
#[derive(Debug, Default)]
pub struct Deadlines {
    /// Applies to both reads and writes.
    pub overall: Deadline,
    /// Applies to reads only.
    pub read: Deadline,
    /// Applies to writes only.
    pub write: Deadline,
}

impl Deadlines {
    /// Creates a fresh set of deadlines, all unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Races `fut` against the overall and read deadlines, whichever is
    /// tighter, waking on a change to either.
    pub async fn race_read<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.race_pair(&self.overall, &self.read, fut).await
    }

    /// Races `fut` against the overall and write deadlines, whichever is
    /// tighter, waking on a change to either.
    pub async fn race_write<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.race_pair(&self.overall, &self.write, fut).await
    }

    async fn race_pair<F>(&self, a: &Deadline, b: &Deadline, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            let notified_a = a.changed.notified();
            tokio::pin!(notified_a);
            notified_a.as_mut().enable();
            let notified_b = b.changed.notified();
            tokio::pin!(notified_b);
            notified_b.as_mut().enable();

            let at = tighter(a.get(), b.get());
            let sleep = sleep_until_opt(at);
            tokio::pin!(sleep);
            tokio::select! {
                biased;
                out = &mut fut => return Ok(out),
                () = &mut notified_a => continue,
                () = &mut notified_b => continue,
                () = &mut sleep => return Err(Error::DeadlineExceeded),
            }
        }
    }
}

fn tighter(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn race_returns_ok_when_future_completes_first() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() + Duration::from_secs(5)));
        let out = deadline.race(async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn race_times_out_with_no_future_progress() {
        let deadline = Deadline::new();
        deadline.set(Some(Instant::now() + Duration::from_millis(10)));
        let err = deadline.race(std::future::pending::<()>()).await;
        assert!(matches!(err, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn race_wakes_on_deadline_moved_to_the_past() {
        let deadline = std::sync::Arc::new(Deadline::new());
        deadline.set(Some(Instant::now() + Duration::from_secs(60)));

        let racer = {
            let deadline = deadline.clone();
            tokio::spawn(async move { deadline.race(std::future::pending::<()>()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        deadline.set(Some(Instant::now()));

        let result = tokio::time::timeout(Duration::from_millis(200), racer)
            .await
            .expect("race should wake promptly after the deadline moved")
            .unwrap();
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn race_read_uses_tighter_of_overall_and_read() {
        let deadlines = Deadlines::new();
        deadlines.overall.set(Some(Instant::now() + Duration::from_secs(60)));
        deadlines.read.set(Some(Instant::now() + Duration::from_millis(10)));
        let err = deadlines.race_read(std::future::pending::<()>()).await;
        assert!(matches!(err, Err(Error::DeadlineExceeded)));
    }
}
