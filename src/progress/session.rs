//! Session registry, publishers and subscriptions.

use super::{ProgressError, ProgressEvent, ProgressFrame, ProgressUpdate, SessionId};
use crate::config::ProgressConfig;
use crate::pipeline::{CancellationToken, RunStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::sync::broadcast::error::RecvError;

struct SessionChannel {
    sender: broadcast::Sender<ProgressFrame>,
    /// Guards sequence assignment together with the send, so sequence order
    /// equals delivery order
    seq: Mutex<u64>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    subscribers: Arc<AtomicUsize>,
}

impl SessionChannel {
    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

struct HubInner {
    sessions: DashMap<SessionId, Arc<SessionChannel>>,
    buffer: usize,
    heartbeat: Duration,
}

/// Registry of live sessions. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: DashMap::new(),
                buffer: config.buffer.max(1),
                heartbeat: config.heartbeat(),
            }),
        }
    }

    /// Create a session with a fresh id and cancellation token.
    pub fn open_session(&self) -> SessionId {
        let id = SessionId::new();
        let (sender, _) = broadcast::channel(self.inner.buffer);
        let channel = SessionChannel {
            sender,
            seq: Mutex::new(0),
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            subscribers: Arc::new(AtomicUsize::new(0)),
        };
        self.inner.sessions.insert(id, Arc::new(channel));
        tracing::debug!(session = %id, "session opened");
        id
    }

    fn channel(&self, id: &SessionId) -> Result<Arc<SessionChannel>, ProgressError> {
        self.inner
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(ProgressError::UnknownSession(*id))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn created_at(&self, id: &SessionId) -> Result<DateTime<Utc>, ProgressError> {
        Ok(self.channel(id)?.created_at)
    }

    pub fn subscriber_count(&self, id: &SessionId) -> Result<usize, ProgressError> {
        Ok(self.channel(id)?.subscribers.load(Ordering::SeqCst))
    }

    /// The session's cancellation token, shared with its run.
    pub fn cancellation(&self, id: &SessionId) -> Result<CancellationToken, ProgressError> {
        Ok(self.channel(id)?.cancel.clone())
    }

    /// A publishing handle bound to one session.
    pub fn publisher(&self, id: SessionId) -> ProgressPublisher {
        ProgressPublisher {
            hub: self.clone(),
            session_id: id,
        }
    }

    /// Append an event to the session's stream and return its sequence
    /// number. Never blocks on subscribers.
    pub fn publish(&self, id: &SessionId, update: ProgressUpdate) -> Result<u64, ProgressError> {
        let channel = self.channel(id)?;
        let seq = {
            let mut seq = channel
                .seq
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *seq += 1;
            let event = ProgressEvent {
                seq: *seq,
                session_id: *id,
                stage: update.stage,
                status: update.status,
                message: update.message,
                cache_hit: update.cache_hit,
                component_id: update.component_id,
                at: Utc::now(),
            };
            // No subscribers is not an error: events are not replayed anyway
            let _ = channel.sender.send(ProgressFrame::Event(event));
            *seq
        };
        channel.touch();
        Ok(seq)
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self, id: &SessionId) -> Result<Subscription, ProgressError> {
        let channel = self.channel(id)?;
        let receiver = {
            // Taken under the sequence lock so no event straddles the subscription point
            let _seq = channel
                .seq
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channel.sender.subscribe()
        };
        channel.subscribers.fetch_add(1, Ordering::SeqCst);
        channel.touch();
        tracing::debug!(session = %id, "subscriber attached");
        Ok(Subscription {
            session_id: *id,
            receiver,
            heartbeat: self.inner.heartbeat,
            cancel: channel.cancel.clone(),
            subscribers: channel.subscribers.clone(),
            finished: false,
            skipped: 0,
        })
    }

    /// Deliver the terminal frame and retire the session.
    pub fn finish(&self, id: &SessionId, status: RunStatus) -> Result<(), ProgressError> {
        let (_, channel) = self
            .inner
            .sessions
            .remove(id)
            .ok_or(ProgressError::UnknownSession(*id))?;
        {
            let _seq = channel
                .seq
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = channel.sender.send(ProgressFrame::Done { status });
        }
        tracing::debug!(session = %id, status = status.as_str(), "session finished");
        Ok(())
    }

    /// Cancel the session's run. The session itself stays until the run
    /// finishes so subscribers still receive the terminal frame.
    pub fn close(&self, id: &SessionId) -> Result<(), ProgressError> {
        let channel = self.channel(id)?;
        channel.cancel.cancel();
        tracing::info!(session = %id, "session closed, run cancelled");
        Ok(())
    }

    /// Remove sessions without activity for longer than `idle_timeout`,
    /// cancelling their runs. Subscribers receive a `cancelled` terminal
    /// frame. Returns the removed ids.
    pub fn reap_idle(&self, idle_timeout: Duration) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > idle_timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = Vec::new();
        for id in stale {
            if let Some((_, channel)) = self.inner.sessions.remove(&id) {
                channel.cancel.cancel();
                {
                    let _seq = channel
                        .seq
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    let _ = channel.sender.send(ProgressFrame::Done {
                        status: RunStatus::Cancelled,
                    });
                }
                tracing::info!(session = %id, "idle session reaped");
                removed.push(id);
            }
        }
        removed
    }

    /// Reap idle sessions periodically in the background. The task ends
    /// once every handle to the hub is gone.
    pub fn spawn_reaper(&self, idle_timeout: Duration) -> JoinHandle<()> {
        let hub = Arc::downgrade(&self.inner);
        let period = (idle_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = hub.upgrade() else {
                    break;
                };
                let reaped = ProgressHub { inner }.reap_idle(idle_timeout);
                if !reaped.is_empty() {
                    tracing::debug!(count = reaped.len(), "reaper pass");
                }
            }
        })
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(&ProgressConfig::default())
    }
}

/// Handle for publishing into one session. Publishing after the session is
/// gone is silently ignored.
#[derive(Clone)]
pub struct ProgressPublisher {
    hub: ProgressHub,
    session_id: SessionId,
}

impl ProgressPublisher {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn publish(&self, update: ProgressUpdate) {
        if let Err(e) = self.hub.publish(&self.session_id, update) {
            tracing::debug!(error = %e, "progress event dropped");
        }
    }
}

/// An ordered view of one session's events.
///
/// Dropping a subscription only detaches it; `disconnect` also cancels the run.
pub struct Subscription {
    session_id: SessionId,
    receiver: broadcast::Receiver<ProgressFrame>,
    heartbeat: Duration,
    cancel: CancellationToken,
    subscribers: Arc<AtomicUsize>,
    finished: bool,
    skipped: u64,
}

impl Subscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Total events lost to lagging so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next frame, or `None` once the terminal frame has been delivered or
    /// the session is gone. Yields a heartbeat after a quiet interval.
    pub async fn next(&mut self) -> Option<ProgressFrame> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.heartbeat, self.receiver.recv()).await {
            Err(_) => Some(ProgressFrame::Heartbeat { at: Utc::now() }),
            Ok(Ok(frame)) => {
                if frame.is_done() {
                    self.finished = true;
                }
                Some(frame)
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(session = %self.session_id, skipped, "subscriber lagging, events dropped");
                self.skipped += skipped;
                Some(ProgressFrame::Lagged { skipped })
            }
            Ok(Err(RecvError::Closed)) => {
                self.finished = true;
                None
            }
        }
    }

    /// Collect every remaining event up to the terminal frame, skipping
    /// heartbeats. Returns the events and the terminal status, if any.
    pub async fn drain(&mut self) -> (Vec<ProgressEvent>, Option<RunStatus>) {
        let mut events = Vec::new();
        let mut status = None;
        while let Some(frame) = self.next().await {
            match frame {
                ProgressFrame::Event(event) => events.push(event),
                ProgressFrame::Done { status: s } => status = Some(s),
                ProgressFrame::Heartbeat { .. } | ProgressFrame::Lagged { .. } => {}
            }
        }
        (events, status)
    }

    /// Detach and cancel the session's run.
    pub fn disconnect(self) {
        tracing::info!(session = %self.session_id, "subscriber disconnected, cancelling run");
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
