//! Per-run context
//!
//! Everything a single conversion run accumulates lives here and is owned by
//! that run: its session, phase, counters and timestamps. Nothing about a run
//! is stored in process-wide state except the shared fingerprint cache.

use super::CancellationToken;
use crate::progress::{ProgressPublisher, ProgressUpdate, SessionId, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Decomposing,
    Processing,
    Assembling,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decomposing => "decomposing",
            Self::Processing => "processing",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Forward steps only; any non-terminal phase may fail.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Decomposing, Processing)
                | (Processing, Assembling)
                | (Assembling, Done)
                | (Decomposing | Processing | Assembling, Failed)
        )
    }
}

/// Run-level timing and counters reported with the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub duration_seconds: f64,
    /// Outbound oracle requests made by this run (retries included)
    pub external_call_count: u64,
    /// `cache_hits / cache_lookups`, 0.0 without lookups
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Explicitly owned context of one conversion run.
pub struct PipelineRun {
    session_id: SessionId,
    publisher: ProgressPublisher,
    cancel: CancellationToken,
    phase: Mutex<RunPhase>,
    cache_hits: AtomicU64,
    cache_lookups: AtomicU64,
    external_calls: AtomicU64,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl PipelineRun {
    pub fn new(publisher: ProgressPublisher, cancel: CancellationToken) -> Self {
        Self {
            session_id: publisher.session_id(),
            publisher,
            cancel,
            phase: Mutex::new(RunPhase::Decomposing),
            cache_hits: AtomicU64::new(0),
            cache_lookups: AtomicU64::new(0),
            external_calls: AtomicU64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    pub fn publish(&self, update: ProgressUpdate) {
        self.publisher.publish(update);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(RunPhase::Failed)
    }

    /// Move to `next`, logging and publishing the change. Illegal transitions
    /// are refused and return false.
    pub fn set_phase(&self, next: RunPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if !phase.can_transition_to(next) {
            tracing::warn!(
                session = %self.session_id,
                from = phase.as_str(),
                to = next.as_str(),
                "refused phase transition"
            );
            return false;
        }
        let previous = *phase;
        *phase = next;
        drop(phase);

        tracing::info!(
            session = %self.session_id,
            from = previous.as_str(),
            to = next.as_str(),
            "run phase"
        );
        self.publish(ProgressUpdate::info(
            Stage::Coordinator,
            format!("phase: {}", next.as_str()),
        ));
        true
    }

    pub fn record_lookup(&self, hit: bool) {
        self.cache_lookups.fetch_add(1, Ordering::SeqCst);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counter the transform stage increments per outbound request.
    pub fn external_calls(&self) -> &AtomicU64 {
        &self.external_calls
    }

    pub fn metadata(&self) -> RunMetadata {
        let hits = self.cache_hits.load(Ordering::SeqCst);
        let lookups = self.cache_lookups.load(Ordering::SeqCst);
        RunMetadata {
            duration_seconds: self.started.elapsed().as_secs_f64(),
            external_call_count: self.external_calls.load(Ordering::SeqCst),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            cache_hits: hits,
            cache_lookups: lookups,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressHub;

    fn run() -> (ProgressHub, PipelineRun) {
        let hub = ProgressHub::default();
        let id = hub.open_session();
        let token = hub.cancellation(&id).unwrap();
        let run = PipelineRun::new(hub.publisher(id), token);
        (hub, run)
    }

    #[test]
    fn phases_move_forward_only() {
        let (_hub, run) = run();
        assert_eq!(run.phase(), RunPhase::Decomposing);
        assert!(!run.set_phase(RunPhase::Assembling));
        assert!(run.set_phase(RunPhase::Processing));
        assert!(run.set_phase(RunPhase::Assembling));
        assert!(run.set_phase(RunPhase::Done));
        assert!(!run.set_phase(RunPhase::Failed));
        assert!(run.phase().is_terminal());
    }

    #[test]
    fn hit_rate_is_zero_without_lookups() {
        let (_hub, run) = run();
        let meta = run.metadata();
        assert_eq!(meta.cache_lookups, 0);
        assert_eq!(meta.cache_hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_counts_this_run_only() {
        let (_hub, run) = run();
        run.record_lookup(true);
        run.record_lookup(false);
        run.record_lookup(true);
        run.record_lookup(true);
        let meta = run.metadata();
        assert_eq!(meta.cache_hits, 3);
        assert_eq!(meta.cache_lookups, 4);
        assert!((meta.cache_hit_rate - 0.75).abs() < f64::EPSILON);
        assert!(meta.finished_at >= meta.started_at);
    }

    #[tokio::test]
    async fn phase_changes_are_published() {
        let hub = ProgressHub::default();
        let id = hub.open_session();
        let mut sub = hub.subscribe(&id).unwrap();
        let run = PipelineRun::new(hub.publisher(id), hub.cancellation(&id).unwrap());
        run.set_phase(RunPhase::Processing);
        hub.finish(&id, crate::pipeline::RunStatus::Completed).unwrap();

        let (events, _) = sub.drain().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Coordinator);
        assert_eq!(events[0].message, "phase: processing");
    }
}
