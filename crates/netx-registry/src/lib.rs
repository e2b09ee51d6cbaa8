#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `netx-registry` types wrapper chains over the pipe traits in
//! `netx-core`. A [`Wrapper`] declares, for each accepted input
//! [`PipeKind`], the one output kind it produces; a [`Driver`] is a named
//! factory that builds a `Wrapper` from string parameters and a [`Side`]; a
//! [`Registry`] is a process-wide, name-keyed table of drivers; and
//! [`validate`]/[`apply_pipeline`] type-check and then run an ordered list
//! of driver invocations against a starting pipe value.
//!
//! # Design
//!
//! Applying a pipeline is a left fold, mirroring
//! `oc-rsync-transport`'s `NegotiatedStream::try_map_inner`: each step
//! consumes the current value and returns either the transformed value or
//! `(error, original_value)`, so a failed step hands the untouched
//! predecessor back for [`PipeValue::close`] instead of losing it.
//!
//! # Invariants
//!
//! - [`Registry::register`] panics on a duplicate name: double registration
//!   is a programmer error, not a runtime condition callers are expected to
//!   handle.
//! - [`validate`] never invokes a driver factory whose declared inputs don't
//!   include the pipeline's running type; it fails fast with
//!   [`netx_core::Error::PipelineTypeMismatch`] naming the offending
//!   position.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

pub use netx_core::{Error, PipeKind, PipeValue, Result};

/// Which end of a pipeline a driver is being asked to build for. A pipeline
/// for a server starts from `Listener`; for a client, from `Dialer`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// Server-side pipeline, starting and ending on `Listener`.
    Server,
    /// Client-side pipeline, starting and ending on `Dialer`.
    Client,
}

impl Side {
    /// The pipe kind a pipeline on this side must start and end on.
    pub fn boundary_kind(self) -> PipeKind {
        match self {
            Side::Server => PipeKind::Listener,
            Side::Client => PipeKind::Dialer,
        }
    }
}

/// Driver parameters: a mapping from lowercase string keys to trimmed
/// string values, as produced by the (out-of-scope) CLI URI parser.
#[derive(Clone, Debug, Default)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Builds params from an iterator of `(key, value)` pairs, lowercasing
    /// keys and trimming values.
    pub fn new(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            map.insert(k.into().to_ascii_lowercase(), v.into().trim().to_string());
        }
        Self(map)
    }

    /// Looks up a parameter by (already-lowercase) key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Looks up and parses a parameter, mapping a missing or unparseable
    /// value to [`Error::InvalidParameter`].
    pub fn parse<T>(&self, driver: &str, key: &str) -> Result<T>
    where
        T: std::str::FromStr,
    {
        let raw = self.get(key).ok_or_else(|| Error::InvalidParameter {
            driver: driver.to_string(),
            key: key.to_string(),
            value: String::new(),
            reason: "missing required parameter".to_string(),
        })?;
        raw.parse().map_err(|_| Error::InvalidParameter {
            driver: driver.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
            reason: "failed to parse value".to_string(),
        })
    }

    /// Looks up and parses a parameter, falling back to `default` when
    /// absent (still validating the value when present).
    pub fn parse_or<T>(&self, driver: &str, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
    {
        if self.get(key).is_some() {
            self.parse(driver, key)
        } else {
            Ok(default)
        }
    }
}

/// A single transform from one pipe value to another. Each accepted input
/// kind maps to exactly one output kind; [`Wrapper::output_for`] returns
/// `None` for an input this wrapper does not declare in
/// [`Wrapper::accepted_inputs`].
#[async_trait]
pub trait Wrapper: Send + Sync {
    /// The driver name this wrapper was built from, used in diagnostics.
    fn name(&self) -> &str;

    /// The non-empty set of [`PipeKind`]s this wrapper accepts.
    fn accepted_inputs(&self) -> &[PipeKind];

    /// The output kind produced for a given accepted input, or `None` if
    /// `input` is not in [`Wrapper::accepted_inputs`].
    fn output_for(&self, input: PipeKind) -> Option<PipeKind>;

    /// Applies this transform, consuming `input`. On failure, returns the
    /// untouched `input` alongside the error so the caller can close it.
    async fn apply(&self, input: PipeValue) -> std::result::Result<PipeValue, (Error, PipeValue)>;
}

/// A named factory: `(params, side) -> Wrapper`.
pub trait Driver: Send + Sync {
    /// The lowercase name this driver is registered under.
    fn name(&self) -> &'static str;

    /// Builds a wrapper from `params` for the given `side`.
    fn build(&self, params: &Params, side: Side) -> Result<Arc<dyn Wrapper>>;
}

/// A process-wide, name-keyed table of drivers, guarded by one
/// reader-preferring lock (spec.md §5).
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<BTreeMap<String, Arc<dyn Driver>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `driver` under its lowercase name.
    ///
    /// # Panics
    ///
    /// Panics if a driver is already registered under that name: double
    /// registration is a programmer error (spec.md §4.1), not a condition
    /// callers recover from.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_ascii_lowercase();
        let mut table = self.drivers.write().unwrap_or_else(|p| p.into_inner());
        assert!(
            table.insert(name.clone(), driver).is_none(),
            "driver {name:?} is already registered"
        );
    }

    /// Looks up a driver by (case-insensitive) name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Driver>> {
        let table = self.drivers.read().unwrap_or_else(|p| p.into_inner());
        table
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownDriver {
                name: name.to_string(),
            })
    }
}

/// One entry in an unvalidated pipeline description: a driver name plus its
/// parameters.
pub struct PipelineEntry {
    /// The driver name to look up in the [`Registry`].
    pub driver: String,
    /// Parameters for that driver.
    pub params: Params,
}

/// Validates `entries` against `registry`, walking left-to-right from
/// `side`'s boundary kind and demanding the final output equal that same
/// kind. Returns the built, ordered wrapper chain ready for
/// [`apply_pipeline`].
pub fn validate(registry: &Registry, entries: &[PipelineEntry], side: Side) -> Result<Vec<Arc<dyn Wrapper>>> {
    let mut current = side.boundary_kind();
    let mut wrappers = Vec::with_capacity(entries.len());

    for (position, entry) in entries.iter().enumerate() {
        let driver = registry.lookup(&entry.driver)?;
        let wrapper = driver.build(&entry.params, side)?;
        let accepted = wrapper.accepted_inputs();
        if !accepted.contains(&current) {
            return Err(Error::PipelineTypeMismatch {
                position,
                driver: entry.driver.clone(),
                found: current,
                expected: accepted.to_vec(),
            });
        }
        current = wrapper
            .output_for(current)
            .expect("accepted input must have a declared output");
        wrappers.push(wrapper);
    }

    if current != side.boundary_kind() {
        return Err(Error::PipelineTypeMismatch {
            position: entries.len(),
            driver: "<pipeline end>".to_string(),
            found: current,
            expected: vec![side.boundary_kind()],
        });
    }

    Ok(wrappers)
}

/// Applies a validated wrapper chain to `start` as a left fold. On failure,
/// the partially-built chain (everything up to and including the last
/// successful step) is closed before the error is returned.
pub async fn apply_pipeline(wrappers: &[Arc<dyn Wrapper>], start: PipeValue) -> Result<PipeValue> {
    let mut current = start;
    for wrapper in wrappers {
        current = match wrapper.apply(current).await {
            Ok(value) => value,
            Err((err, mut built_so_far)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(driver = wrapper.name(), error = %err, "pipeline application failed, closing partial chain");
                let _ = built_so_far.close().await;
                return Err(err);
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netx_core::test_support::in_memory_pair;

    struct EchoListenerToTagged;

    #[async_trait]
    impl Wrapper for EchoListenerToTagged {
        fn name(&self) -> &str {
            "echo"
        }

        fn accepted_inputs(&self) -> &[PipeKind] {
            &[PipeKind::Listener]
        }

        fn output_for(&self, input: PipeKind) -> Option<PipeKind> {
            (input == PipeKind::Listener).then_some(PipeKind::Listener)
        }

        async fn apply(
            &self,
            input: PipeValue,
        ) -> std::result::Result<PipeValue, (Error, PipeValue)> {
            Ok(input)
        }
    }

    struct RejectEverything;

    #[async_trait]
    impl Wrapper for RejectEverything {
        fn name(&self) -> &str {
            "reject"
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
            Err((Error::Closed, input))
        }
    }

    #[test]
    fn register_panics_on_duplicate_name() {
        struct Dummy;
        impl Driver for Dummy {
            fn name(&self) -> &'static str {
                "dup"
            }
            fn build(&self, _: &Params, _: Side) -> Result<Arc<dyn Wrapper>> {
                unreachable!()
            }
        }
        let registry = Registry::new();
        registry.register(Arc::new(Dummy));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(Arc::new(Dummy));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_type_mismatch_at_position() {
        let registry = Registry::new();
        struct RejectDriver;
        impl Driver for RejectDriver {
            fn name(&self) -> &'static str {
                "reject"
            }
            fn build(&self, _: &Params, _: Side) -> Result<Arc<dyn Wrapper>> {
                Ok(Arc::new(RejectEverything))
            }
        }
        registry.register(Arc::new(RejectDriver));

        let entries = vec![PipelineEntry {
            driver: "reject".to_string(),
            params: Params::default(),
        }];
        let err = validate(&registry, &entries, Side::Server).unwrap_err();
        assert!(matches!(err, Error::PipelineTypeMismatch { position: 0, .. }));
    }

    #[tokio::test]
    async fn apply_pipeline_closes_partial_chain_on_failure() {
        let registry = Registry::new();
        struct EchoDriver;
        impl Driver for EchoDriver {
            fn name(&self) -> &'static str {
                "echo"
            }
            fn build(&self, _: &Params, _: Side) -> Result<Arc<dyn Wrapper>> {
                Ok(Arc::new(EchoListenerToTagged))
            }
        }
        registry.register(Arc::new(EchoDriver));

        let entries = vec![PipelineEntry {
            driver: "echo".to_string(),
            params: Params::default(),
        }];
        let wrappers = validate(&registry, &entries, Side::Server).unwrap();

        let (listener, _dialer) = in_memory_pair(1, 64);
        let value = PipeValue::Listener(Box::new(listener));
        let applied = apply_pipeline(&wrappers, value).await.unwrap();
        assert_eq!(applied.kind(), PipeKind::Listener);
    }
}
