//! testport: oracle-driven conversion of Cypress test files to Playwright
//!
//! The crate is the orchestration core around an external text
//! transformation oracle (an LLM). It does not rewrite code itself; it
//! decides what to send, caches what comes back, checks it, and puts the
//! pieces back together.
//!
//! # Core Concepts
//!
//! - **Components**: independently transformable units of a source file
//!   (tests, hooks, custom commands, other statements)
//! - **Fingerprint cache**: content-addressed outcomes with at most one
//!   in-flight computation per key, shared by every run
//! - **Stages**: transform (oracle call with transient-failure retry) and
//!   validate (structural checks, corrective retries)
//! - **Assembler**: one output file with the suite hierarchy rebuilt
//! - **Progress**: per-session event stream for observers, also served
//!   over HTTP by [`server`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use testport::{ConversionRequest, Coordinator, MockOracle, PipelineConfig};
//!
//! # async fn demo() {
//! let oracle = Arc::new(MockOracle::new());
//! let coordinator = Coordinator::new(oracle, PipelineConfig::default());
//! let result = coordinator
//!     .convert(ConversionRequest::new("it('works', () => { cy.visit('/') })"))
//!     .await;
//! println!("{}", result.status.as_str());
//! # }
//! ```

pub mod assemble;
pub mod cache;
pub mod component;
pub mod config;
pub mod decompose;
pub mod oracle;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod stage;

pub use assemble::{Artifact, Assembler, LayoutHints};
pub use cache::{CacheStats, Fingerprint, FingerprintCache, Lookup};
pub use component::{Component, ComponentId, ComponentKind, ComponentRole, CustomCommand};
pub use config::{ConfigError, PipelineConfig, RetryContext};
pub use decompose::{Decomposer, Decomposition, DecompositionError, JavaScriptDecomposer, SourceDialect};
pub use oracle::{CommandOracle, MockOracle, Oracle, OracleError, OracleRequest};
pub use pipeline::{
    CancellationToken, ComponentOutcome, ComponentReport, ConversionOptions, ConversionRequest,
    ConversionResult, Coordinator, PipelineError, RunHandle, RunMetadata, RunStatus, TransformCache,
};
pub use progress::{
    EventStatus, ProgressError, ProgressEvent, ProgressFrame, ProgressHub, ProgressUpdate,
    SessionId, Stage, Subscription,
};
pub use stage::{Issue, Severity, StructuralValidator, ValidationReport, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
