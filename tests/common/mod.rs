#![allow(dead_code)]

//! Common test utilities for testport integration tests
//!
//! Provides sample Cypress sources, a rough rule-based translator used as
//! the mock oracle's fallback, and coordinator builders with fast retry
//! settings.

pub mod fixtures;
pub mod translator;

pub use fixtures::{LOGIN_SPEC, MALFORMED_SPEC, THREE_TESTS};
pub use translator::translate;

use async_trait::async_trait;
use std::sync::Arc;
use testport::stage::IssueKind;
use testport::{
    Component, Coordinator, Decomposer, Decomposition, DecompositionError, Issue, MockOracle, Oracle,
    OracleError, OracleRequest, PipelineConfig, SourceDialect, ValidationReport, Validator,
};
use tokio::sync::Semaphore;

/// Config with millisecond backoff so transient-retry paths stay fast.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.transform.initial_backoff_ms = 1;
    config.transform.max_backoff_ms = 5;
    config.transform.oracle_timeout_secs = 5;
    config
}

/// Mock oracle that translates every unscripted source with `translate`.
pub fn translating_oracle() -> MockOracle {
    MockOracle::new().with_fallback(translate)
}

pub fn coordinator_with(oracle: Arc<MockOracle>, config: PipelineConfig) -> Coordinator {
    Coordinator::new(oracle, config)
}

/// Validator that rejects every result with a single error.
pub struct RejectingValidator;

impl Validator for RejectingValidator {
    fn validate(&self, component: &Component, _transformed: &str, _dialect: SourceDialect) -> ValidationReport {
        ValidationReport::from_issues(
            component.id.clone(),
            vec![Issue::error(IssueKind::MissingTargetCall, "always invalid")],
        )
    }
}

/// Oracle that holds every call until `open` is called, then behaves like
/// the wrapped mock.
pub struct GatedOracle {
    inner: MockOracle,
    gate: Semaphore,
}

impl GatedOracle {
    pub fn new(inner: MockOracle) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl Oracle for GatedOracle {
    async fn transform(&self, request: &OracleRequest) -> Result<String, OracleError> {
        // The permit goes back on drop, so one `open` lets every call through
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| OracleError::Transport("gate closed".into()))?;
        self.inner.transform(request).await
    }
}

/// Decomposer that panics on every input.
pub struct PanickingDecomposer;

impl Decomposer for PanickingDecomposer {
    fn decompose(&self, _source: &str, _dialect: SourceDialect) -> Result<Decomposition, DecompositionError> {
        panic!("decomposer blew up")
    }
}
