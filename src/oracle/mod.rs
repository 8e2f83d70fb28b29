//! Transformation oracle client
//!
//! The oracle is the external text transformer (an LLM behind some service)
//! that rewrites one component at a time. This module defines the client
//! trait and the request/error types. Two implementations:
//! - `CommandOracle`: spawns a configured command per request (production)
//! - `MockOracle`: scripted responses (testing)

mod subprocess;

pub use subprocess::CommandOracle;

use crate::decompose::SourceDialect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One outbound transformation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Stage name, e.g. `transform/test` or `transform.retry/test`
    pub stage: String,
    /// Instruction set identifier for the component's role
    pub instructions: String,
    pub dialect: SourceDialect,
    /// Source-framework text to rewrite
    pub source: String,
    /// Validation issues of the previous attempt (corrective retries only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_attempt: Option<String>,
    /// Names of custom commands declared in the same file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_commands: Vec<String>,
}

impl OracleRequest {
    pub fn new(
        stage: impl Into<String>,
        instructions: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            instructions: instructions.into(),
            dialect: SourceDialect::default(),
            source: source.into(),
            prior_issues: Vec::new(),
            prior_attempt: None,
            custom_commands: Vec::new(),
        }
    }

    pub fn is_corrective(&self) -> bool {
        !self.prior_issues.is_empty()
    }

    /// The text that identifies this request's output: the source, the
    /// dialect and custom commands it is rewritten against, and corrective
    /// context when present. Fields are separated by NUL-led headers.
    pub fn cache_text(&self) -> String {
        let mut text = self.source.clone();
        text.push_str("\n\u{0}dialect\n");
        text.push_str(self.dialect.as_str());
        text.push('\n');
        if !self.custom_commands.is_empty() {
            text.push_str("\u{0}commands\n");
            for command in &self.custom_commands {
                text.push_str(command);
                text.push('\n');
            }
        }
        if !self.is_corrective() {
            return text;
        }
        text.push_str("\u{0}issues\n");
        for issue in &self.prior_issues {
            text.push_str(issue);
            text.push('\n');
        }
        if let Some(prior) = &self.prior_attempt {
            text.push_str("\u{0}prior\n");
            text.push_str(prior);
        }
        text
    }
}

/// Errors from oracle calls, split into transient and permanent classes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle rate limited: {0}")]
    RateLimited(String),
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle rejected input: {0}")]
    Rejected(String),
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Transient failures are worth retrying; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Transport(_)
        )
    }

    pub fn class(&self) -> &'static str {
        if self.is_transient() {
            "transient"
        } else {
            "permanent"
        }
    }
}

/// Client trait for the transformation oracle.
///
/// Abstracts over transport (subprocess, HTTP, mock) so the transform stage
/// doesn't depend on how the oracle is reached.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Rewrite `request.source`, returning the raw response text.
    async fn transform(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

/// Strip a surrounding markdown code fence and surrounding blank lines.
///
/// An empty result is a malformed response.
pub fn normalize_response(raw: &str) -> Result<String, OracleError> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // Skip the info string (```ts, ```javascript, ...)
            let after_info = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
            after_info
                .trim_end()
                .strip_suffix("```")
                .unwrap_or(after_info)
                .trim_matches('\n')
        }
        None => trimmed,
    };
    if body.trim().is_empty() {
        return Err(OracleError::Malformed("empty response".to_string()));
    }
    Ok(body.trim_end().to_string())
}

type Fallback = Arc<dyn Fn(&OracleRequest) -> Result<String, OracleError> + Send + Sync>;

/// Mock oracle for testing. Returns scripted responses keyed by source text.
///
/// A scripted sequence is consumed one entry per call; its last entry then
/// repeats. Sources without a script go to the fallback, which rejects the
/// input unless replaced with `with_fallback`.
pub struct MockOracle {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, OracleError>>>>,
    fallback: Fallback,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<OracleRequest>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Arc::new(|request: &OracleRequest| {
                Err(OracleError::Rejected(format!(
                    "no scripted response for {}",
                    request.stage
                )))
            }),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `response` for `source`.
    pub fn with_response(self, source: impl Into<String>, response: impl Into<String>) -> Self {
        self.with_sequence(source, vec![Ok(response.into())])
    }

    /// Always fail with `error` for `source`.
    pub fn with_failure(self, source: impl Into<String>, error: OracleError) -> Self {
        self.with_sequence(source, vec![Err(error)])
    }

    /// Answer successive calls for `source` from `outcomes`.
    pub fn with_sequence(
        self,
        source: impl Into<String>,
        outcomes: Vec<Result<String, OracleError>>,
    ) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(source.into(), outcomes.into());
        }
        self
    }

    /// Handle unscripted sources with `f`.
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&OracleRequest) -> Result<String, OracleError> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(f);
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_scripted(&self, source: &str) -> Option<Result<String, OracleError>> {
        let mut scripts = self.scripts.lock().ok()?;
        let queue = scripts.get_mut(source)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn transform(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_scripted(&request.source) {
            Some(outcome) => outcome,
            None => (self.fallback)(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes() {
        assert!(OracleError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(OracleError::RateLimited("429".into()).is_transient());
        assert!(OracleError::Transport("reset".into()).is_transient());
        assert!(!OracleError::Rejected("nope".into()).is_transient());
        assert_eq!(OracleError::Malformed("x".into()).class(), "permanent");
    }

    #[test]
    fn normalize_strips_code_fence() {
        let raw = "```typescript\ntest('a', async ({ page }) => {\n  await page.goto('/');\n});\n```\n";
        assert_eq!(
            normalize_response(raw).unwrap(),
            "test('a', async ({ page }) => {\n  await page.goto('/');\n});"
        );
        assert_eq!(normalize_response("  plain text \n").unwrap(), "plain text");
    }

    #[test]
    fn normalize_rejects_empty_responses() {
        assert!(matches!(
            normalize_response("```js\n```"),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            normalize_response("   "),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn corrective_requests_extend_the_cache_text() {
        let first = OracleRequest::new("transform/test", "translate-test", "it('a')");
        assert!(first.cache_text().starts_with("it('a')\n"));

        let mut retry = first.clone();
        retry.prior_issues = vec!["residual cy call".to_string()];
        assert!(retry.is_corrective());
        assert_ne!(retry.cache_text(), first.cache_text());

        let mut with_prior = retry.clone();
        with_prior.prior_attempt = Some("test('a')".to_string());
        assert_ne!(with_prior.cache_text(), retry.cache_text());
    }

    #[test]
    fn dialect_and_custom_commands_are_part_of_the_cache_text() {
        let js = OracleRequest::new("transform/test", "translate-test", "it('a')");
        let mut ts = js.clone();
        ts.dialect = SourceDialect::TypeScript;
        assert_ne!(js.cache_text(), ts.cache_text());

        let mut with_commands = js.clone();
        with_commands.custom_commands = vec!["login(email, password)".to_string()];
        assert_ne!(js.cache_text(), with_commands.cache_text());
    }

    #[tokio::test]
    async fn mock_sequence_then_repeat_last() {
        let oracle = MockOracle::new().with_sequence(
            "src",
            vec![
                Err(OracleError::RateLimited("slow down".into())),
                Ok("out".to_string()),
            ],
        );
        let request = OracleRequest::new("transform/test", "translate-test", "src");

        assert!(oracle.transform(&request).await.is_err());
        assert_eq!(oracle.transform(&request).await.unwrap(), "out");
        assert_eq!(oracle.transform(&request).await.unwrap(), "out");
        assert_eq!(oracle.calls(), 3);
        assert_eq!(oracle.requests().len(), 3);
    }

    #[tokio::test]
    async fn mock_unscripted_source_uses_fallback() {
        let strict = MockOracle::new();
        let request = OracleRequest::new("transform/test", "translate-test", "unknown");
        assert!(matches!(
            strict.transform(&request).await,
            Err(OracleError::Rejected(_))
        ));

        let echo = MockOracle::new().with_fallback(|r| Ok(r.source.to_uppercase()));
        assert_eq!(echo.transform(&request).await.unwrap(), "UNKNOWN");
    }
}
