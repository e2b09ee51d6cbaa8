//! Registers the `aesgcm` driver so a pipeline description can insert this
//! wrapper by name.

use std::sync::Arc;

use async_trait::async_trait;
use data_encoding::HEXLOWER_PERMISSIVE;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::{AesGcmConfig, AesGcmConn};

/// The `aesgcm` driver: `Conn -> Conn`. Requires a `key` parameter (hex
/// encoded, 32/48/64 hex digits for AES-128/192/256). Optional `max_packet`.
pub struct AesGcmDriver;

impl Driver for AesGcmDriver {
    fn name(&self) -> &'static str {
        "aesgcm"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let key_hex = params.get("key").ok_or_else(|| Error::InvalidParameter {
            driver: "aesgcm".to_string(),
            key: "key".to_string(),
            value: String::new(),
            reason: "missing required parameter".to_string(),
        })?;
        let key = HEXLOWER_PERMISSIVE
            .decode(key_hex.as_bytes())
            .map_err(|_| Error::InvalidParameter {
                driver: "aesgcm".to_string(),
                key: "key".to_string(),
                value: key_hex.to_string(),
                reason: "not valid hex".to_string(),
            })?;
        let max_packet: usize = params.parse_or("aesgcm", "max_packet", 32 * 1024)?;
        let config = AesGcmConfig::new().with_max_packet(max_packet);
        Ok(Arc::new(AesGcmWrapper { key, config }))
    }
}

struct AesGcmWrapper {
    key: Vec<u8>,
    config: AesGcmConfig,
}

#[async_trait]
impl Wrapper for AesGcmWrapper {
    fn name(&self) -> &str {
        "aesgcm"
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
            PipeValue::Conn(conn) => match AesGcmConn::handshake(conn, &self.key, self.config).await {
                Ok(encrypted) => Ok(PipeValue::Conn(Box::new(encrypted))),
                Err((err, conn)) => Err((err, PipeValue::Conn(conn))),
            },
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "aesgcm".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}
