//! [`MuxClient`]: a `Dialer -> Conn` wrapper that makes a sequence of
//! dial-per-round-trip sub-connections look like one persistent `Conn`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use netx_core::{Conn, Deadlines, Dialer, Error, Result};

/// Adapts a [`netx_core::Dialer`] into a `Conn` that transparently redials
/// on a read-side EOF. Per spec.md §4.5, writes never redial on EOF — the
/// error surfaces to the caller instead, so a write is never silently
/// duplicated against a second dial.
pub struct MuxClient {
    dialer: Arc<dyn Dialer>,
    current: Option<Box<dyn Conn>>,
    deadlines: Deadlines,
    closed: bool,
}

impl MuxClient {
    /// Wraps `dialer`. No sub-connection is dialed until the first
    /// `read`/`write` call.
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            current: None,
            deadlines: Deadlines::new(),
            closed: false,
        }
    }

    async fn dial_current(&mut self) -> Result<()> {
        let mut conn = self.dialer.dial().await?;
        conn.set_deadline(self.deadlines.overall.get());
        conn.set_read_deadline(self.deadlines.read.get());
        conn.set_write_deadline(self.deadlines.write.get());
        self.current = Some(conn);
        Ok(())
    }

    async fn ensure_current(&mut self) -> Result<()> {
        if self.current.is_none() {
            self.dial_current().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Conn for MuxClient {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.ensure_current().await?;
        match self.current.as_mut().expect("just ensured").read(buf).await {
            Err(Error::Eof) => {
                self.current = None;
                self.dial_current().await?;
                self.current.as_mut().expect("just dialed").read(buf).await
            }
            other => other,
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.ensure_current().await?;
        self.current.as_mut().expect("just ensured").write(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut conn) = self.current.take() {
            conn.close().await?;
        }
        Ok(())
    }

    fn set_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.overall.set(when);
        if let Some(conn) = self.current.as_mut() {
            conn.set_deadline(when);
        }
    }

    fn set_read_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.read.set(when);
        if let Some(conn) = self.current.as_mut() {
            conn.set_read_deadline(when);
        }
    }

    fn set_write_deadline(&mut self, when: Option<Instant>) {
        self.deadlines.write.set(when);
        if let Some(conn) = self.current.as_mut() {
            conn.set_write_deadline(when);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::in_memory_pair;

    #[tokio::test]
    async fn dials_lazily_on_first_write() {
        let (mut listener, dialer) = in_memory_pair(4, 256);
        let mut client = MuxClient::new(Arc::new(dialer));

        let server_task = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = conn.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        client.write(b"hello").await.unwrap();
        let got = server_task.await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn redials_on_eof_during_read() {
        let (mut listener, dialer) = in_memory_pair(4, 256);
        let mut client = MuxClient::new(Arc::new(dialer));

        // First sub-connection: server closes immediately, causing the
        // client's next read to observe EOF and redial.
        let first_server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            conn.close().await.unwrap();
            listener
        });
        client.write(b"trigger-dial").await.unwrap();
        let mut listener = first_server.await.unwrap();

        let second_server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            conn.write(b"second-conn-reply").await.unwrap();
        });

        let mut buf = [0u8; 32];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second-conn-reply");
        second_server.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_listener, dialer) = in_memory_pair(4, 256);
        let mut client = MuxClient::new(Arc::new(dialer));
        client.close().await.unwrap();
        client.close().await.unwrap();
        let err = client.read(&mut [0u8; 8]).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
