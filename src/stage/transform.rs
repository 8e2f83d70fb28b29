//! Transform stage
//!
//! Sends one component to the oracle. Transient failures are retried with
//! exponential backoff; permanent failures propagate at once.

use crate::component::ComponentId;
use crate::config::TransformConfig;
use crate::oracle::{normalize_response, Oracle, OracleError, OracleRequest};
use crate::progress::{ProgressPublisher, ProgressUpdate, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry schedule for transient oracle failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransformConfig::default())
    }
}

impl From<&TransformConfig> for RetryPolicy {
    fn from(config: &TransformConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Per-call context: where to report progress and what to count.
pub struct TransformContext<'a> {
    pub publisher: &'a ProgressPublisher,
    pub component_id: &'a ComponentId,
    /// Incremented once per outbound oracle request
    pub external_calls: &'a AtomicU64,
}

pub struct TransformStage {
    oracle: Arc<dyn Oracle>,
    policy: RetryPolicy,
    oracle_timeout: Duration,
}

impl TransformStage {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self::from_config(oracle, &TransformConfig::default())
    }

    pub fn from_config(oracle: Arc<dyn Oracle>, config: &TransformConfig) -> Self {
        Self {
            oracle,
            policy: RetryPolicy::from(config),
            oracle_timeout: Duration::from_secs(config.oracle_timeout_secs),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call_once(&self, request: &OracleRequest) -> Result<String, OracleError> {
        match tokio::time::timeout(self.oracle_timeout, self.oracle.transform(request)).await {
            Ok(response) => normalize_response(&response?),
            Err(_) => Err(OracleError::Timeout(self.oracle_timeout)),
        }
    }

    /// Transform `request.source`, retrying transient failures.
    pub async fn transform(
        &self,
        request: &OracleRequest,
        cx: &TransformContext<'_>,
    ) -> Result<String, OracleError> {
        let mut retry = 0;
        loop {
            cx.external_calls.fetch_add(1, Ordering::SeqCst);
            cx.publisher.publish(
                ProgressUpdate::working(
                    Stage::Transform,
                    format!("{}: calling oracle (attempt {})", request.stage, retry + 1),
                )
                .for_component(cx.component_id)
                .with_cache_hit(false),
            );

            match self.call_once(request).await {
                Ok(text) => {
                    cx.publisher.publish(
                        ProgressUpdate::complete(Stage::Transform, "oracle responded")
                            .for_component(cx.component_id)
                            .with_cache_hit(false),
                    );
                    return Ok(text);
                }
                Err(e) if e.is_transient() && retry < self.policy.max_retries => {
                    let delay = self.policy.backoff(retry);
                    tracing::warn!(
                        component = %cx.component_id,
                        error = %e,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient oracle failure, retrying"
                    );
                    cx.publisher.publish(
                        ProgressUpdate::info(
                            Stage::Transform,
                            format!("{}; retrying in {}ms", e, delay.as_millis()),
                        )
                        .for_component(cx.component_id),
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    tracing::warn!(component = %cx.component_id, error = %e, "oracle call failed");
                    cx.publisher.publish(
                        ProgressUpdate::error(Stage::Transform, e.to_string())
                            .for_component(cx.component_id),
                    );
                    return Err(e);
                }
            }
        }
    }
}
