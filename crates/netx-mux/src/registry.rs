//! Registers the `mux` and `muxclient` drivers so a pipeline description can
//! insert these wrappers by name.

use std::sync::Arc;

use async_trait::async_trait;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::shared::MuxConfig;
use crate::{Mux, MuxClient};

fn config_from_params(driver: &str, params: &Params) -> RegistryResult<MuxConfig> {
    let buf_size: usize = params.parse_or(driver, "buf_size", 4 * 1024)?;
    let queue_capacity: usize = params.parse_or(driver, "queue_capacity", 64)?;
    Ok(MuxConfig::new().with_buf_size(buf_size).with_queue_capacity(queue_capacity))
}

/// The `mux` driver: `Listener -> TaggedConn`.
pub struct MuxDriver;

impl Driver for MuxDriver {
    fn name(&self) -> &'static str {
        "mux"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let config = config_from_params("mux", params)?;
        Ok(Arc::new(MuxWrapper { config }))
    }
}

struct MuxWrapper {
    config: MuxConfig,
}

#[async_trait]
impl Wrapper for MuxWrapper {
    fn name(&self) -> &str {
        "mux"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Listener]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Listener).then_some(PipeKind::TaggedConn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Listener(listener) => Ok(PipeValue::TaggedConn(Box::new(Mux::new(listener, self.config)))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "mux".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Listener],
                },
                other,
            )),
        }
    }
}

/// The `muxclient` driver: `Dialer -> Conn`.
pub struct MuxClientDriver;

impl Driver for MuxClientDriver {
    fn name(&self) -> &'static str {
        "muxclient"
    }

    fn build(&self, _params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        Ok(Arc::new(MuxClientWrapper))
    }
}

struct MuxClientWrapper;

#[async_trait]
impl Wrapper for MuxClientWrapper {
    fn name(&self) -> &str {
        "muxclient"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Dialer]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Dialer).then_some(PipeKind::Conn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Dialer(dialer) => Ok(PipeValue::Conn(Box::new(MuxClient::new(Arc::from(dialer))))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "muxclient".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Dialer],
                },
                other,
            )),
        }
    }
}
