//! Pipeline coordinator
//!
//! Drives one conversion run through its phases:
//!
//! ```text
//! Decomposing → Processing → Assembling → Done
//!      └────────────┴─────────────┴──────→ Failed
//! ```
//!
//! Processing fans components out to a bounded worker pool. Each worker runs
//! transform → validate with a bounded corrective retry loop, going through the
//! shared fingerprint cache for every transform. Component failures are not
//! fatal: the component becomes a stub and the run ends
//! `completed-with-issues`. Only decomposition failure or a panic in any stage
//! fail the run; the session still receives its terminal frame.

mod cancel;
mod run;

pub use cancel::CancellationToken;
pub use run::{PipelineRun, RunMetadata, RunPhase};

use crate::assemble::{Artifact, Assembler, AssemblyPart, LayoutHints, Placement};
use crate::cache::{Fingerprint, FingerprintCache};
use crate::component::{Component, ComponentId, ComponentKind, CustomCommand};
use crate::config::{PipelineConfig, RetryContext};
use crate::decompose::{Decomposer, Decomposition, DecompositionError, JavaScriptDecomposer, SourceDialect};
use crate::oracle::{Oracle, OracleError, OracleRequest};
use crate::progress::{ProgressError, ProgressHub, ProgressUpdate, SessionId, Stage, Subscription};
use crate::stage::{
    transform_stage_name, StructuralValidator, TransformContext, TransformStage, ValidationReport,
    Validator,
};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

/// Cache of transform outcomes, shared by every run of a process.
pub type TransformCache = FingerprintCache<String, OracleError>;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Completed,
    CompletedWithIssues,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithIssues => "completed-with-issues",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Run-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub dialect: SourceDialect,
    /// Name of the input file, for logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input_text: String,
    #[serde(default)]
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            options: ConversionOptions::default(),
        }
    }

    pub fn with_dialect(mut self, dialect: SourceDialect) -> Self {
        self.options.dialect = dialect;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.options.file_name = Some(name.into());
        self
    }
}

/// How a component's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentOutcome {
    Converted,
    Failed,
    Cancelled,
}

/// Per-component entry of a conversion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub label: String,
    pub outcome: ComponentOutcome,
    /// Accepted transformed text; absent when the component was stubbed
    pub final_text: Option<String>,
    pub validation: Option<ValidationReport>,
    /// Transform attempts made (first attempt plus corrective retries)
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentReport {
    fn new(component: &Component, outcome: ComponentOutcome) -> Self {
        Self {
            id: component.id.clone(),
            kind: component.kind,
            label: component.label.clone(),
            outcome,
            final_text: None,
            validation: None,
            attempts: 0,
            error: None,
        }
    }

    /// True when the component needs a human look.
    pub fn has_issues(&self) -> bool {
        self.outcome != ComponentOutcome::Converted
            || self.error.is_some()
            || self.validation.as_ref().is_some_and(|v| !v.valid)
    }
}

/// Result of one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub session_id: SessionId,
    pub status: RunStatus,
    pub artifact: Option<Artifact>,
    pub per_component: Vec<ComponentReport>,
    pub custom_commands: Vec<CustomCommand>,
    pub metadata: RunMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A run started in the background.
pub struct RunHandle {
    pub session_id: SessionId,
    /// Subscription taken before the run began, so no event is missed
    pub events: Subscription,
    pub join: JoinHandle<ConversionResult>,
}

impl RunHandle {
    /// Wait for the run, discarding remaining events.
    pub async fn wait(self) -> Result<ConversionResult, PipelineError> {
        self.join
            .await
            .map_err(|e| PipelineError::Internal(format!("run task failed: {}", e)))
    }
}

/// Orchestrates conversion runs. Cheap to clone; clones share the cache and
/// the progress hub.
#[derive(Clone)]
pub struct Coordinator {
    decomposer: Arc<dyn Decomposer>,
    transform: Arc<TransformStage>,
    validator: Arc<dyn Validator>,
    assembler: Arc<Assembler>,
    cache: Arc<TransformCache>,
    hub: ProgressHub,
    config: Arc<PipelineConfig>,
}

impl Coordinator {
    pub fn new(oracle: Arc<dyn Oracle>, config: PipelineConfig) -> Self {
        Self {
            decomposer: Arc::new(JavaScriptDecomposer::new()),
            transform: Arc::new(TransformStage::from_config(oracle, &config.transform)),
            validator: Arc::new(StructuralValidator::new()),
            assembler: Arc::new(Assembler::default()),
            cache: Arc::new(TransformCache::with_capacity(config.cache.capacity)),
            hub: ProgressHub::new(&config.progress),
            config: Arc::new(config),
        }
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_transform_stage(mut self, stage: TransformStage) -> Self {
        self.transform = Arc::new(stage);
        self
    }

    /// Share a cache with other coordinators.
    pub fn with_cache(mut self, cache: Arc<TransformCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_hub(mut self, hub: ProgressHub) -> Self {
        self.hub = hub;
        self
    }

    pub fn with_layout(mut self, hints: LayoutHints) -> Self {
        self.assembler = Arc::new(Assembler::new(hints));
        self
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn cache(&self) -> &Arc<TransformCache> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run a conversion to completion in a fresh session.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult {
        let session_id = self.hub.open_session();
        self.run_session(session_id, request).await
    }

    /// Start a conversion in the background. The returned handle carries the
    /// session id and a subscription that sees every event of the run.
    pub fn start(&self, request: ConversionRequest) -> Result<RunHandle, PipelineError> {
        let session_id = self.hub.open_session();
        let events = self.hub.subscribe(&session_id)?;
        let coordinator = self.clone();
        let join = tokio::spawn(async move { coordinator.run_session(session_id, request).await });
        Ok(RunHandle {
            session_id,
            events,
            join,
        })
    }

    async fn run_session(&self, session_id: SessionId, request: ConversionRequest) -> ConversionResult {
        let cancel = self
            .hub
            .cancellation(&session_id)
            .unwrap_or_default();
        let run = Arc::new(PipelineRun::new(self.hub.publisher(session_id), cancel));
        let dialect = request.options.dialect;

        tracing::info!(
            session = %session_id,
            file = request.options.file_name.as_deref().unwrap_or("<input>"),
            dialect = dialect.as_str(),
            "conversion started"
        );

        run.publish(ProgressUpdate::working(Stage::Decomposer, "decomposing input"));
        let decomposed = guarded("decomposer", || {
            self.decomposer.decompose(&request.input_text, dialect)
        })
        .and_then(|result| result.map_err(PipelineError::from));
        let decomposition = match decomposed {
            Ok(decomposition) => decomposition,
            Err(e) => return self.fail(&run, e, Vec::new()),
        };
        run.publish(ProgressUpdate::complete(
            Stage::Decomposer,
            format!(
                "{} components, {} custom commands",
                decomposition.components.len(),
                decomposition.custom_commands.len()
            ),
        ));

        run.set_phase(RunPhase::Processing);
        let reports = match self.process(&run, &decomposition, dialect).await {
            Ok(reports) => reports,
            Err(e) => return self.fail(&run, e, decomposition.custom_commands),
        };

        run.set_phase(RunPhase::Assembling);
        run.publish(ProgressUpdate::working(Stage::Assembler, "assembling output"));
        let parts: Vec<AssemblyPart<'_>> = decomposition
            .components
            .iter()
            .zip(&reports)
            .map(|(component, report)| AssemblyPart {
                component,
                placement: placement(report),
            })
            .collect();
        let artifact = match guarded("assembler", || {
            self.assembler.assemble(parts, &decomposition.imports)
        }) {
            Ok(artifact) => artifact,
            Err(e) => return self.fail(&run, e, decomposition.custom_commands),
        };
        run.publish(ProgressUpdate::complete(
            Stage::Assembler,
            format!(
                "{} components placed, {} stubs",
                artifact.placements.len(),
                artifact.stub_count
            ),
        ));

        let status = if run.is_cancelled() {
            RunStatus::Cancelled
        } else if reports.iter().any(ComponentReport::has_issues) {
            RunStatus::CompletedWithIssues
        } else {
            RunStatus::Completed
        };
        run.set_phase(RunPhase::Done);

        let metadata = run.metadata();
        tracing::info!(
            session = %session_id,
            status = status.as_str(),
            components = reports.len(),
            external_calls = metadata.external_call_count,
            cache_hit_rate = metadata.cache_hit_rate,
            duration_seconds = metadata.duration_seconds,
            "conversion finished"
        );
        self.finish(session_id, status);

        ConversionResult {
            session_id,
            status,
            artifact: Some(artifact),
            per_component: reports,
            custom_commands: decomposition.custom_commands,
            metadata,
            error: None,
        }
    }

    fn fail(
        &self,
        run: &PipelineRun,
        error: PipelineError,
        custom_commands: Vec<CustomCommand>,
    ) -> ConversionResult {
        let session_id = run.session_id();
        tracing::warn!(session = %session_id, error = %error, "conversion failed");
        run.publish(ProgressUpdate::error(Stage::Coordinator, error.to_string()));
        run.set_phase(RunPhase::Failed);
        self.finish(session_id, RunStatus::Failed);
        ConversionResult {
            session_id,
            status: RunStatus::Failed,
            artifact: None,
            per_component: Vec::new(),
            custom_commands,
            metadata: run.metadata(),
            error: Some(error.to_string()),
        }
    }

    fn finish(&self, session_id: SessionId, status: RunStatus) {
        if let Err(e) = self.hub.finish(&session_id, status) {
            // Reaped while running; nobody is listening any more
            tracing::debug!(session = %session_id, error = %e, "no session to finish");
        }
    }

    /// Process every component on a bounded worker pool. Reports come back
    /// in component order.
    async fn process(
        &self,
        run: &Arc<PipelineRun>,
        decomposition: &Decomposition,
        dialect: SourceDialect,
    ) -> Result<Vec<ComponentReport>, PipelineError> {
        let permits = Arc::new(Semaphore::new(self.config.worker_limit.max(1)));
        let commands: Arc<Vec<String>> = Arc::new(
            decomposition
                .custom_commands
                .iter()
                .map(|c| format!("{}({})", c.name, c.params.join(", ")))
                .collect(),
        );

        let mut workers = JoinSet::new();
        for (index, component) in decomposition.components.iter().cloned().enumerate() {
            let worker = Worker {
                run: run.clone(),
                transform: self.transform.clone(),
                validator: self.validator.clone(),
                cache: self.cache.clone(),
                commands: commands.clone(),
                dialect,
                stage_config_version: self.config.stage_config_version,
                validate_retries: self.config.validate.max_retries,
                retry_context: self.config.validate.retry_context,
            };
            let permits = permits.clone();
            workers.spawn(async move {
                let permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok(),
                    _ = worker.run.cancellation().cancelled() => None,
                };
                let report = match permit {
                    Some(_permit) => worker.process(&component).await,
                    None => worker.cancelled(&component),
                };
                (index, report)
            });
        }

        let mut reports: Vec<Option<ComponentReport>> = vec![None; decomposition.components.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => {
                    workers.abort_all();
                    return Err(PipelineError::Internal(format!("component worker failed: {}", e)));
                }
            }
        }

        reports
            .into_iter()
            .enumerate()
            .map(|(i, report)| {
                report.ok_or_else(|| PipelineError::Internal(format!("no report for component {}", i)))
            })
            .collect()
    }
}

/// Run a synchronous stage, turning a panic into an internal error so the
/// run can still fail cleanly and release its subscribers.
fn guarded<T>(stage: &str, f: impl FnOnce() -> T) -> Result<T, PipelineError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(stage, reason = %reason, "stage panicked");
        PipelineError::Internal(format!("{} panicked: {}", stage, reason))
    })
}

fn placement(report: &ComponentReport) -> Placement {
    match &report.final_text {
        Some(text) => Placement::Converted(text.clone()),
        None => Placement::Stub {
            reason: match report.outcome {
                ComponentOutcome::Cancelled => "not converted: run cancelled".to_string(),
                _ => report
                    .error
                    .clone()
                    .unwrap_or_else(|| "conversion failed".to_string()),
            },
            issues: report
                .validation
                .as_ref()
                .map(|v| v.summaries())
                .unwrap_or_default(),
        },
    }
}

/// Everything one component task needs, owned so the task can be spawned.
struct Worker {
    run: Arc<PipelineRun>,
    transform: Arc<TransformStage>,
    validator: Arc<dyn Validator>,
    cache: Arc<TransformCache>,
    commands: Arc<Vec<String>>,
    dialect: SourceDialect,
    stage_config_version: u32,
    validate_retries: u32,
    retry_context: RetryContext,
}

impl Worker {
    fn request(&self, component: &Component, prior: Option<&(String, ValidationReport)>) -> OracleRequest {
        let mut request = OracleRequest::new(
            transform_stage_name(component.role, prior.is_some()),
            component.role.instructions(),
            component.source_text.clone(),
        );
        request.dialect = self.dialect;
        request.custom_commands = self.commands.as_ref().clone();
        if let Some((text, report)) = prior {
            request.prior_issues = report.summaries();
            if self.retry_context == RetryContext::IssuesAndPriorAttempt {
                request.prior_attempt = Some(text.clone());
            }
        }
        request
    }

    fn cancelled(&self, component: &Component) -> ComponentReport {
        self.run.publish(
            ProgressUpdate::info(Stage::Coordinator, "skipped: run cancelled").for_component(&component.id),
        );
        ComponentReport::new(component, ComponentOutcome::Cancelled)
    }

    async fn process(&self, component: &Component) -> ComponentReport {
        let mut attempts = 0u32;
        let mut prior: Option<(String, ValidationReport)> = None;

        loop {
            if self.run.is_cancelled() {
                return match prior {
                    Some((text, report)) => accepted(component, text, report, attempts),
                    None => self.cancelled(component),
                };
            }

            let request = self.request(component, prior.as_ref());
            let fingerprint = Fingerprint::compute(
                &request.cache_text(),
                &request.stage,
                self.stage_config_version,
            );
            attempts += 1;

            let cx = TransformContext {
                publisher: self.run.publisher(),
                component_id: &component.id,
                external_calls: self.run.external_calls(),
            };
            let lookup = self
                .cache
                .get_or_compute(fingerprint, || self.transform.transform(&request, &cx))
                .await;
            self.run.record_lookup(lookup.hit);
            self.run.publish(
                ProgressUpdate::info(
                    Stage::Cache,
                    if lookup.hit {
                        format!("{} served from cache", component.label)
                    } else {
                        format!("{} computed", component.label)
                    },
                )
                .for_component(&component.id)
                .with_cache_hit(lookup.hit),
            );

            let text = match lookup.outcome {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(component = %component.id, error = %e, "component transform failed");
                    self.run.publish(
                        ProgressUpdate::error(Stage::Transform, format!("{}: {}", component.label, e))
                            .for_component(&component.id),
                    );
                    // A failed corrective retry keeps the previous attempt
                    let mut report = match prior {
                        Some((text, validation)) => accepted(component, text, validation, attempts),
                        None => {
                            let mut report = ComponentReport::new(component, ComponentOutcome::Failed);
                            report.attempts = attempts;
                            report
                        }
                    };
                    report.error = Some(e.to_string());
                    return report;
                }
            };

            self.run.publish(
                ProgressUpdate::working(Stage::Validate, format!("validating {}", component.label))
                    .for_component(&component.id),
            );
            let validation = self.validator.validate(component, &text, self.dialect);
            if validation.valid {
                self.run.publish(
                    ProgressUpdate::complete(Stage::Validate, format!("{} is valid", component.label))
                        .for_component(&component.id),
                );
                return accepted(component, text, validation, attempts);
            }

            let errors = validation.errors().count();
            if attempts > self.validate_retries {
                tracing::warn!(
                    component = %component.id,
                    attempts,
                    errors,
                    "retry budget spent, accepting invalid result"
                );
                self.run.publish(
                    ProgressUpdate::error(
                        Stage::Validate,
                        format!("{}: {} validation errors remain", component.label, errors),
                    )
                    .for_component(&component.id),
                );
                return accepted(component, text, validation, attempts);
            }

            tracing::debug!(component = %component.id, attempts, errors, "invalid result, corrective retry");
            self.run.publish(
                ProgressUpdate::info(
                    Stage::Validate,
                    format!("{}: {} validation errors, retrying", component.label, errors),
                )
                .for_component(&component.id),
            );
            prior = Some((text, validation));
        }
    }
}

fn accepted(component: &Component, text: String, validation: ValidationReport, attempts: u32) -> ComponentReport {
    let mut report = ComponentReport::new(component, ComponentOutcome::Converted);
    report.final_text = Some(text);
    report.validation = Some(validation);
    report.attempts = attempts;
    report
}
