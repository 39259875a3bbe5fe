//! Runtime event log
//!
//! Append-only audit trail of one player run.
//! - Event: envelope with id + offset + kind
//! - EventKind: flow, view/data and player-level variants
//! - EventLog: thread-safe, append-only log
//! - EventEmitter: what the player records through (`NoopEmitter` discards)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single entry in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // FLOW LEVEL
    // ═══════════════════════════════════════════
    FlowStarted {
        flow_id: Arc<str>,
    },
    Transitioned {
        flow_id: Arc<str>,
        from: Option<String>,
        to: String,
    },
    FlowEnded {
        flow_id: Arc<str>,
        outcome: String,
    },

    // ═══════════════════════════════════════════
    // VIEW / DATA
    // ═══════════════════════════════════════════
    ViewUpdated {
        view_id: Arc<str>,
        view: Value,
    },
    DataUpdated {
        bindings: Vec<String>,
    },
    ErrorCaptured {
        error_type: String,
        severity: String,
        message: String,
    },

    // ═══════════════════════════════════════════
    // PLAYER LEVEL
    // ═══════════════════════════════════════════
    PlayerCompleted {
        flow_id: String,
        outcome: String,
        data: Value,
    },
    PlayerFailed {
        error: String,
    },
}

impl EventKind {
    /// Flow id for flow-level events
    pub fn flow_id(&self) -> Option<&str> {
        match self {
            Self::FlowStarted { flow_id }
            | Self::Transitioned { flow_id, .. }
            | Self::FlowEnded { flow_id, .. } => Some(flow_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PlayerCompleted { .. } | Self::PlayerFailed { .. }
        )
    }
}

/// Sink the player records its run into
pub trait EventEmitter: Send + Sync {
    /// Record an event, returning its id
    fn emit(&self, kind: EventKind) -> u64;

    /// Everything recorded so far
    fn snapshot(&self) -> Vec<Event> {
        Vec::new()
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events belonging to one flow
    pub fn filter_flow(&self, flow_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.flow_id() == Some(flow_id))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    fn snapshot(&self) -> Vec<Event> {
        self.events()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_with_type_tag() {
        let kind = EventKind::Transitioned {
            flow_id: "F1".into(),
            from: Some("S1".into()),
            to: "E1".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "transitioned");
        assert_eq!(json["flow_id"], "F1");
        assert_eq!(json["to"], "E1");
    }

    #[test]
    fn kind_deserializes_from_tagged_json() {
        let kind: EventKind = serde_json::from_value(json!({
            "type": "data_updated",
            "bindings": ["a.b"]
        }))
        .unwrap();
        assert_eq!(
            kind,
            EventKind::DataUpdated {
                bindings: vec!["a.b".into()]
            }
        );
    }

    #[test]
    fn emit_returns_monotonic_ids() {
        let log = EventLog::new();
        let a = log.emit(EventKind::FlowStarted { flow_id: "F".into() });
        let b = log.emit(EventKind::PlayerFailed { error: "x".into() });
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 2);
        assert!(log.events()[1].kind.is_terminal());
    }

    #[test]
    fn filter_flow_keeps_only_that_flow() {
        let log = EventLog::new();
        log.emit(EventKind::FlowStarted { flow_id: "A".into() });
        log.emit(EventKind::FlowStarted { flow_id: "B".into() });
        log.emit(EventKind::FlowEnded {
            flow_id: "A".into(),
            outcome: "done".into(),
        });
        log.emit(EventKind::DataUpdated { bindings: vec![] });

        assert_eq!(log.filter_flow("A").len(), 2);
        assert_eq!(log.filter_flow("B").len(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EventKind::FlowStarted { flow_id: "F".into() });
        assert_eq!(cloned.len(), 1);
        assert_eq!(cloned.snapshot().len(), 1);
        assert_eq!(log.to_json()[0]["kind"]["type"], "flow_started");
    }

    #[test]
    fn noop_emitter_records_nothing() {
        let emitter = NoopEmitter;
        emitter.emit(EventKind::FlowStarted { flow_id: "F".into() });
        assert!(emitter.snapshot().is_empty());
    }

    #[test]
    fn concurrent_emits_are_all_kept() {
        use std::thread;

        let log = EventLog::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                thread::spawn(move || {
                    log.emit(EventKind::DataUpdated {
                        bindings: vec![format!("k{i}")],
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 8);
    }
}
