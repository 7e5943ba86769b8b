//! Request lifecycle events
//!
//! Every request produces `start, (progress | token)*, (result | error), end`.
//! [`RequestEvents`] enforces that shape and fans each event out to the
//! per-request stream, the shared [`EventBroadcaster`] and the response log.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use ts_rs::TS;
use uuid::Uuid;

use crate::{error::ErrorCategory, modes::CognitiveTier};

/// Events emitted while a request is processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    Start {
        trace_id: Uuid,
        mode: String,
        tier: CognitiveTier,
        timestamp: DateTime<Utc>,
    },

    Progress {
        trace_id: Uuid,
        stage: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    Token {
        trace_id: Uuid,
        text: String,
    },

    Result {
        trace_id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },

    Error {
        trace_id: Uuid,
        category: ErrorCategory,
        message: String,
        timestamp: DateTime<Utc>,
    },

    End {
        trace_id: Uuid,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn trace_id(&self) -> Uuid {
        match self {
            LifecycleEvent::Start { trace_id, .. }
            | LifecycleEvent::Progress { trace_id, .. }
            | LifecycleEvent::Token { trace_id, .. }
            | LifecycleEvent::Result { trace_id, .. }
            | LifecycleEvent::Error { trace_id, .. }
            | LifecycleEvent::End { trace_id, .. } => *trace_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Start { .. } => "start",
            LifecycleEvent::Progress { .. } => "progress",
            LifecycleEvent::Token { .. } => "token",
            LifecycleEvent::Result { .. } => "result",
            LifecycleEvent::Error { .. } => "error",
            LifecycleEvent::End { .. } => "end",
        }
    }
}

/// Shared broadcast of every request's events
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self { sender }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Terminal,
    Ended,
}

struct EventLog {
    phase: Phase,
    events: Vec<LifecycleEvent>,
}

/// Per-request event emitter
#[derive(Clone)]
pub struct RequestEvents {
    trace_id: Uuid,
    log: Arc<Mutex<EventLog>>,
    stream: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    broadcaster: Option<EventBroadcaster>,
}

impl RequestEvents {
    pub fn new(trace_id: Uuid) -> Self {
        Self {
            trace_id,
            log: Arc::new(Mutex::new(EventLog {
                phase: Phase::Pending,
                events: Vec::new(),
            })),
            stream: None,
            broadcaster: None,
        }
    }

    pub fn with_stream(mut self, stream: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: EventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    fn emit(&self, event: LifecycleEvent) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let next = match (&event, log.phase) {
            (LifecycleEvent::Start { .. }, Phase::Pending) => Phase::Running,
            (LifecycleEvent::Progress { .. } | LifecycleEvent::Token { .. }, Phase::Running) => {
                Phase::Running
            }
            (LifecycleEvent::Result { .. } | LifecycleEvent::Error { .. }, Phase::Running) => {
                Phase::Terminal
            }
            (LifecycleEvent::End { .. }, Phase::Running | Phase::Terminal) => Phase::Ended,
            (_, phase) => {
                tracing::debug!(
                    trace_id = %self.trace_id,
                    event = event.kind(),
                    ?phase,
                    "[EVENTS] Dropping out-of-order event"
                );
                return;
            }
        };
        log.phase = next;
        log.events.push(event.clone());

        // Sent under the lock so every consumer sees the same order
        if let Some(stream) = &self.stream {
            // Receiver may have gone away; the response still carries the log
            let _ = stream.send(event.clone());
        }
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(event);
        }
    }

    pub fn start(&self, mode: &str, tier: CognitiveTier) {
        self.emit(LifecycleEvent::Start {
            trace_id: self.trace_id,
            mode: mode.to_string(),
            tier,
            timestamp: Utc::now(),
        });
    }

    pub fn progress(&self, stage: &str, message: impl Into<String>) {
        self.emit(LifecycleEvent::Progress {
            trace_id: self.trace_id,
            stage: stage.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn token(&self, text: impl Into<String>) {
        self.emit(LifecycleEvent::Token {
            trace_id: self.trace_id,
            text: text.into(),
        });
    }

    pub fn result(&self, text: impl Into<String>) {
        self.emit(LifecycleEvent::Result {
            trace_id: self.trace_id,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn error(&self, category: ErrorCategory, message: impl Into<String>) {
        self.emit(LifecycleEvent::Error {
            trace_id: self.trace_id,
            category,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn end(&self, elapsed_ms: u64) {
        self.emit(LifecycleEvent::End {
            trace_id: self.trace_id,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    /// Events emitted so far, in order
    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clone()
    }
}
