//! Registers the `dnsclient` and `dnsserver` drivers so a pipeline
//! description can insert these wrappers by name.

use std::sync::Arc;

use async_trait::async_trait;

use netx_core::{Error, PipeKind, PipeValue};
use netx_registry::{Driver, Params, Result as RegistryResult, Side, Wrapper};

use crate::{DnsClient, DnsClientConfig, DnsServer, DnsServerConfig};

fn domain_param(driver: &str, params: &Params) -> RegistryResult<String> {
    params.get("domain").map(str::to_string).ok_or_else(|| Error::InvalidParameter {
        driver: driver.to_string(),
        key: "domain".to_string(),
        value: String::new(),
        reason: "missing required parameter".to_string(),
    })
}

/// The `dnsclient` driver: `Conn -> Conn`. Requires a `domain` parameter.
pub struct DnsClientDriver;

impl Driver for DnsClientDriver {
    fn name(&self) -> &'static str {
        "dnsclient"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let domain = domain_param("dnsclient", params)?;
        Ok(Arc::new(DnsClientWrapper {
            config: DnsClientConfig::new(domain),
        }))
    }
}

struct DnsClientWrapper {
    config: DnsClientConfig,
}

#[async_trait]
impl Wrapper for DnsClientWrapper {
    fn name(&self) -> &str {
        "dnsclient"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::Conn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::Conn(Box::new(DnsClient::new(conn, self.config.clone())))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "dnsclient".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}

/// The `dnsserver` driver: `Conn -> TaggedConn`. Requires a `domain`
/// parameter; optional `max_write` (default 765).
pub struct DnsServerDriver;

impl Driver for DnsServerDriver {
    fn name(&self) -> &'static str {
        "dnsserver"
    }

    fn build(&self, params: &Params, _side: Side) -> RegistryResult<Arc<dyn Wrapper>> {
        let domain = domain_param("dnsserver", params)?;
        let max_write: u16 = params.parse_or("dnsserver", "max_write", 765)?;
        Ok(Arc::new(DnsServerWrapper {
            config: DnsServerConfig::new(domain).with_max_write(max_write),
        }))
    }
}

struct DnsServerWrapper {
    config: DnsServerConfig,
}

#[async_trait]
impl Wrapper for DnsServerWrapper {
    fn name(&self) -> &str {
        "dnsserver"
    }

    fn accepted_inputs(&self) -> &[PipeKind] {
        &[PipeKind::Conn]
    }

    fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
        (input == PipeKind::Conn).then_some(PipeKind::TaggedConn)
    }

    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)> {
        match input {
            PipeValue::Conn(conn) => Ok(PipeValue::TaggedConn(Box::new(DnsServer::new(conn, self.config.clone())))),
            other => Err((
                Error::PipelineTypeMismatch {
                    position: 0,
                    driver: "dnsserver".to_string(),
                    found: other.kind(),
                    expected: vec![PipeKind::Conn],
                },
                other,
            )),
        }
    }
}
