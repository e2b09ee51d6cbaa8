//! Registers the `demux`, `taggeddemux`, and `demuxclient` drivers so a
//! pipeline description can insert these wrappers by name.

use std::sync::Arc;

use async_trait::async_trait;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::shared::DemuxConfig;
use crate::{Demux, DemuxClient, TaggedDemux};

fn config_from_params(driver: &str, params: &Params) -> RegistryResult<DemuxConfig> {
    let id_len: usize = params.parse_or(driver, "id_len", 4)?;
    let max_message_size: usize = params.parse_or(driver, "max_message_size", 64 * 1024)?;
    let queue_capacity: usize = params.parse_or(driver, "queue_capacity", 64)?;
    DemuxConfig::new()
        .with_id_len(id_len)
        .map(|c| c.with_max_message_size(max_message_size).with_queue_capacity(queue_capacity))
        .map_err(|err| match err {
            Error::InvalidConfig(reason) => Error::InvalidParameter {
                driver: driver.to_string(),
                key: "id_len".to_string(),
                value: id_len.to_string(),
                reason,
            },
            other => other,
        })
}

/// The `demux` driver: `Conn -> Listener`.
pub struct DemuxDriver;

impl Driver for DemuxDriver {
    fn name(&self) -> &'static str {
        "demux"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let config = config_from_params("demux", params)?;
        Ok(Arc::new(DemuxWrapper { config }))
    }
}

struct DemuxWrapper {
    config: DemuxConfig,
}

#[async_trait]
impl Wrapper for DemuxWrapper {
    fn name(&self) -> &str {
        "demux"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Listener)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::Listener(Box::new(Demux::new(conn, self.config)))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "demux".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}

/// The `taggeddemux` driver: `TaggedConn -> Listener`.
pub struct TaggedDemuxDriver;

impl Driver for TaggedDemuxDriver {
    fn name(&self) -> &'static str {
        "taggeddemux"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let config = config_from_params("taggeddemux", params)?;
        Ok(Arc::new(TaggedDemuxWrapper { config }))
    }
}

struct TaggedDemuxWrapper {
    config: DemuxConfig,
}

#[async_trait]
impl Wrapper for TaggedDemuxWrapper {
    fn name(&self) -> &str {
        "taggeddemux"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::TaggedConn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::TaggedConn).then_some(PipeKind::Listener)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::TaggedConn(conn) => {
                Ok(PipeValue::Listener(Box::new(TaggedDemux::new(conn, self.config))))
            }
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "taggeddemux".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::TaggedConn],
                },
                other,
            )),
        }
    }
}

/// The `demuxclient` driver: `Conn -> Dialer`.
pub struct DemuxClientDriver;

impl Driver for DemuxClientDriver {
    fn name(&self) -> &'static str {
        "demuxclient"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let config = config_from_params("demuxclient", params)?;
        Ok(Arc::new(DemuxClientWrapper { config }))
    }
}

struct DemuxClientWrapper {
    config: DemuxConfig,
}

#[async_trait]
impl Wrapper for DemuxClientWrapper {
    fn name(&self) -> &str {
        "demuxclient"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Dialer)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::Dialer(Box::new(DemuxClient::new(conn, self.config)))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "demuxclient".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}
