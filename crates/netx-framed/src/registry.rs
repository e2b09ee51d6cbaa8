//! Registers the `framed` driver so a pipeline description can insert this
//! wrapper by name.

use std::sync::Arc;

use async_trait::async_trait;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::{FramedConfig, FramedConn};

/// The `framed` driver: `Conn -> Conn`, wrapping the input in length-prefixed
/// framing. Accepts one optional parameter, `max_frame_size`.
pub struct FramedDriver;

impl Driver for FramedDriver {
    fn name(&self) -> &'static str {
        "framed"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let max_frame_size: u32 = params.parse_or("framed", "max_frame_size", 4096)?;
        let config = FramedConfig::new().with_max_frame_size(max_frame_size)?;
        Ok(Arc::new(FramedWrapper { config }))
    }
}

struct FramedWrapper {
    config: FramedConfig,
}

#[async_trait]
impl Wrapper for FramedWrapper {
    fn name(&self) -> &str {
        "framed"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Conn)
    }

    async fn apply(
        &self,
        input: PipeValue,
    ) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => {
                Ok(PipeValue::Conn(Box::new(FramedConn::with_config(conn, self.config))))
            }
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "framed".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}
