//! Progress channel
//!
//! Session-scoped, multi-subscriber stream of progress events. Publishing
//! never blocks the pipeline: each session owns a bounded broadcast buffer
//! and a subscriber that falls behind loses the oldest events (and is told
//! how many). Subscribers only see events published after they subscribed.

mod session;

pub use session::{ProgressHub, ProgressPublisher, Subscription};

use crate::component::ComponentId;
use crate::pipeline::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one observing session (one run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, ProgressError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProgressError::InvalidSessionId(s.to_string()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from the progress channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgressError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Pipeline stage an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decomposer,
    Cache,
    Transform,
    Validate,
    Assembler,
    Coordinator,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decomposer => "decomposer",
            Self::Cache => "cache",
            Self::Transform => "transform",
            Self::Validate => "validate",
            Self::Assembler => "assembler",
            Self::Coordinator => "coordinator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Working,
    Complete,
    Error,
    Info,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Event content supplied by a publisher; the hub stamps sequence number,
/// session and time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub status: EventStatus,
    pub message: String,
    pub cache_hit: Option<bool>,
    pub component_id: Option<ComponentId>,
}

impl ProgressUpdate {
    pub fn new(stage: Stage, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            stage,
            status,
            message: message.into(),
            cache_hit: None,
            component_id: None,
        }
    }

    pub fn working(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, EventStatus::Working, message)
    }

    pub fn complete(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, EventStatus::Complete, message)
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, EventStatus::Error, message)
    }

    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, EventStatus::Info, message)
    }

    pub fn for_component(mut self, id: &ComponentId) -> Self {
        self.component_id = Some(id.clone());
        self
    }

    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = Some(hit);
        self
    }
}

/// A published event as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Per-session sequence number, starting at 1
    pub seq: u64,
    pub session_id: SessionId,
    pub stage: Stage,
    pub status: EventStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<ComponentId>,
    pub at: DateTime<Utc>,
}

/// One item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressFrame {
    Event(ProgressEvent),
    /// Produced locally after a quiet heartbeat interval
    Heartbeat { at: DateTime<Utc> },
    /// The subscriber fell behind and `skipped` events were dropped
    Lagged { skipped: u64 },
    /// The run reached a terminal state; nothing follows
    Done { status: RunStatus },
}

impl ProgressFrame {
    pub fn as_event(&self) -> Option<&ProgressEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
