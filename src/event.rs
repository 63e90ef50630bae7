//! Structured events emitted by the coordinator on every request transition.
//!
//! Consumers read the event log to build audit trails or debug views of
//! which request won a race. The handler is the caller's voice; events are
//! the coordinator's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ActionKey;

/// A structured event emitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RequestDispatched {
        key: ActionKey,
        request_seq: u64,
    },
    RequestSuperseded {
        key: ActionKey,
        request_seq: u64,
        by: u64,
    },
    RequestCancelled {
        key: ActionKey,
        request_seq: u64,
    },
    RequestDelivered {
        key: ActionKey,
        request_seq: u64,
        success: bool,
        duration_ms: u64,
    },
    /// A superseded or cancelled request finished; its outcome was dropped.
    OutcomeDiscarded {
        key: ActionKey,
        request_seq: u64,
    },
}

impl EventKind {
    pub fn key(&self) -> &ActionKey {
        match self {
            EventKind::RequestDispatched { key, .. }
            | EventKind::RequestSuperseded { key, .. }
            | EventKind::RequestCancelled { key, .. }
            | EventKind::RequestDelivered { key, .. }
            | EventKind::OutcomeDiscarded { key, .. } => key,
        }
    }
}

/// Append-only, bounded event log.
#[derive(Debug)]
pub(crate) struct EventLog {
    events: std::collections::VecDeque<Event>,
    next_seq: u64,
    capacity: usize,
}

impl EventLog {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            events: std::collections::VecDeque::new(),
            next_seq: 1,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn record(&mut self, kind: EventKind) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            seq: self.next_seq,
            timestamp: Utc::now(),
            kind,
        });
        self.next_seq += 1;
    }

    pub(crate) fn since(&self, since_seq: u64) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.seq > since_seq)
            .cloned()
            .collect()
    }
}
