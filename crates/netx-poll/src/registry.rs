//! Registers the `poll` and `pollserver` drivers so a pipeline description
//! can insert these wrappers by name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::{PollConfig, PollConn, PollServerConfig, PollServerConn};

/// The `poll` driver: `Conn -> Conn`, client side.
pub struct PollConnDriver;

impl Driver for PollConnDriver {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let poll_interval_ms: u64 = params.parse_or("poll", "poll_interval_ms", 100)?;
        let config = PollConfig::new().with_poll_interval(Duration::from_millis(poll_interval_ms));
        Ok(Arc::new(PollWrapper { config }))
    }
}

struct PollWrapper {
    config: PollConfig,
}

#[async_trait]
impl Wrapper for PollWrapper {
    fn name(&self) -> &str {
        "poll"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Conn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::Conn(Box::new(PollConn::new(conn, self.config)))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "poll".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}

/// The `pollserver` driver: `Conn -> Conn`, server side.
pub struct PollServerConnDriver;

impl Driver for PollServerConnDriver {
    fn name(&self) -> &'static str {
        "pollserver"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let mut config = PollServerConfig::new();
        if let Some(timeout_ms) = params.get("idle_timeout_ms") {
            let timeout_ms: u64 = timeout_ms.parse().map_err(|_| Error::InvalidParameter {
                driver: "pollserver".to_string(),
                key: "idle_timeout_ms".to_string(),
                value: timeout_ms.to_string(),
                reason: "failed to parse value".to_string(),
            })?;
            config = config.with_poll_timeout(Duration::from_millis(timeout_ms));
        }
        Ok(Arc::new(PollServerWrapper { config }))
    }
}

struct PollServerWrapper {
    config: PollServerConfig,
}

#[async_trait]
impl Wrapper for PollServerWrapper {
    fn name(&self) -> &str {
        "pollserver"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Conn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::Conn(Box::new(PollServerConn::new(conn, self.config)))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "pollserver".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}
