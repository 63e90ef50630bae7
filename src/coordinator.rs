//! Request coordinator. The public API for dispatching and cancelling work.
//!
//! The coordinator owns the per-key sequence counters, active flags,
//! outcome handlers, and the event log. Every request transition goes
//! through here. For a given key only the most recently dispatched request
//! can deliver; anything older is discarded when it finishes.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug, info, warn};

use crate::error::Result;
use crate::event::{Event, EventKind, EventLog};
use crate::model::{Action, ActionKey, Outcome, RequestState};
use crate::telemetry::metrics;
use crate::telemetry::request::{record_state_transition, start_request_span};
use crate::transport::Transport;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

type Handler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Work produced by [`Coordinator::dispatch_action`].
pub type ActionWork = BoxFuture<'static, Outcome>;

/// What a registered handler receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub key: ActionKey,
    pub seq: u64,
    pub outcome: Outcome,
}

/// Whether a key currently has a request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    Idle,
    Active { seq: u64 },
}

/// Terminal label of a settled request.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The outcome went to the handler (if any) and is returned here.
    Delivered(Outcome),
    /// A newer dispatch for the key took over. The outcome was dropped.
    Superseded { by: u64 },
    /// The key was cancelled. The outcome was dropped.
    Cancelled,
}

impl Disposition {
    pub fn state(&self) -> RequestState {
        match self {
            Disposition::Delivered(_) => RequestState::Delivered,
            Disposition::Superseded { .. } => RequestState::Superseded,
            Disposition::Cancelled => RequestState::Cancelled,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Disposition::Delivered(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// What the awaiting caller gets back once the work finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub key: ActionKey,
    pub seq: u64,
    pub disposition: Disposition,
}

#[derive(Default)]
struct Class {
    latest: u64,
    active: Option<u64>,
    /// Requests labelled superseded or cancelled whose work is still running.
    labelled: HashMap<u64, Disposition>,
    handler: Option<Handler>,
}

impl Class {
    /// Idle with nothing to remember beyond its sequence counter.
    fn is_vacant(&self) -> bool {
        self.active.is_none() && self.labelled.is_empty() && self.handler.is_none()
    }
}

struct Inner {
    classes: HashMap<ActionKey, Class>,
    /// Highest sequence number handed out by a class that has since been
    /// removed. Recreated classes count on from here, keeping each key's
    /// sequence monotonic.
    retired_seq: u64,
    events: EventLog,
}

impl Inner {
    fn class<'a>(
        classes: &'a mut HashMap<ActionKey, Class>,
        retired_seq: u64,
        key: &ActionKey,
    ) -> &'a mut Class {
        classes.entry(key.clone()).or_insert_with(|| Class {
            latest: retired_seq,
            ..Class::default()
        })
    }

    fn prune(&mut self, key: &ActionKey) {
        if let Some(class) = self.classes.get(key).filter(|c| c.is_vacant()) {
            self.retired_seq = self.retired_seq.max(class.latest);
            self.classes.remove(key);
        }
    }
}

/// The request coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a coordinator that keeps at most `capacity` events.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                classes: HashMap::new(),
                retired_seq: 0,
                events: EventLog::with_capacity(capacity),
            })),
        }
    }

    // Never held across an await or while a handler runs.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the outcome handler for a key, replacing any previous one.
    pub fn on_outcome<H>(&self, key: &str, handler: H) -> Result<()>
    where
        H: Fn(Delivery) + Send + Sync + 'static,
    {
        let key = ActionKey::parse(key)?;
        let mut inner = self.lock();
        let Inner {
            classes,
            retired_seq,
            ..
        } = &mut *inner;
        Inner::class(classes, *retired_seq, &key).handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Start a request for `key`. Any request already active for the key is
    /// superseded immediately.
    ///
    /// Validation and sequence assignment happen here, before any work
    /// runs. The returned [`Dispatch`] must be settled or spawned for the
    /// work to execute.
    pub fn dispatch<F>(&self, key: &str, work: F) -> Result<Dispatch<F>>
    where
        F: Future<Output = Outcome>,
    {
        let key = ActionKey::parse(key)?;

        let seq = {
            let mut inner = self.lock();
            let Inner {
                classes,
                retired_seq,
                events,
            } = &mut *inner;
            let class = Inner::class(classes, *retired_seq, &key);
            let seq = class.latest + 1;

            if let Some(prev) = class.active.take() {
                class
                    .labelled
                    .insert(prev, Disposition::Superseded { by: seq });
                events.record(EventKind::RequestSuperseded {
                    key: key.clone(),
                    request_seq: prev,
                    by: seq,
                });
                debug!(key = %key, seq = prev, by = seq, "request superseded");
            }

            class.latest = seq;
            class.active = Some(seq);
            events.record(EventKind::RequestDispatched {
                key: key.clone(),
                request_seq: seq,
            });
            seq
        };

        metrics::requests_dispatched().add(1, &[KeyValue::new("key", key.to_string())]);
        let span = start_request_span(key.as_str(), seq);
        record_state_transition(&span, "idle", "active");

        Ok(Dispatch {
            work,
            registration: Registration {
                coordinator: self.clone(),
                key,
                seq,
                span,
                settled: false,
            },
        })
    }

    /// Dispatch `action` through `transport` under the action's key.
    pub fn dispatch_action(
        &self,
        transport: Arc<dyn Transport>,
        action: &Action,
    ) -> Result<Dispatch<ActionWork>> {
        let descriptor = action.descriptor();
        let work: ActionWork = Box::pin(async move { transport.perform(&descriptor).await });
        self.dispatch(&action.key, work)
    }

    /// Drop whatever request is active for `key`. Returns `true` if one was.
    ///
    /// The underlying work keeps running; only its delivery is suppressed.
    pub fn cancel(&self, key: &str) -> Result<bool> {
        let key = ActionKey::parse(key)?;
        let mut inner = self.lock();
        let Inner {
            classes, events, ..
        } = &mut *inner;

        let Some(class) = classes.get_mut(&key) else {
            return Ok(false);
        };
        let Some(seq) = class.active.take() else {
            return Ok(false);
        };

        class.labelled.insert(seq, Disposition::Cancelled);
        events.record(EventKind::RequestCancelled {
            key: key.clone(),
            request_seq: seq,
        });
        info!(key = %key, seq, "request cancelled");
        Ok(true)
    }

    pub fn status(&self, key: &str) -> Result<ClassStatus> {
        let key = ActionKey::parse(key)?;
        let inner = self.lock();
        let status = match inner.classes.get(&key).and_then(|c| c.active) {
            Some(seq) => ClassStatus::Active { seq },
            None => ClassStatus::Idle,
        };
        Ok(status)
    }

    /// Number of keys the coordinator holds state for. Keys that are idle
    /// and have no handler are forgotten.
    pub fn tracked_keys(&self) -> usize {
        self.lock().classes.len()
    }

    /// Get events since a sequence number (exclusive).
    pub fn events_since(&self, since_seq: u64) -> Vec<Event> {
        self.lock().events.since(since_seq)
    }
}

/// A dispatched request whose work has not run yet.
#[must_use = "a dispatch does nothing until it is settled or spawned"]
pub struct Dispatch<F> {
    work: F,
    registration: Registration,
}

impl<F> Dispatch<F>
where
    F: Future<Output = Outcome>,
{
    pub fn key(&self) -> &ActionKey {
        &self.registration.key
    }

    pub fn seq(&self) -> u64 {
        self.registration.seq
    }

    /// Run the work to completion and deliver or discard its outcome.
    pub async fn settle(self) -> Settled {
        let Dispatch {
            work,
            mut registration,
        } = self;
        let span = registration.span.clone();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(work)
            .catch_unwind()
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(parent: &span, %message, "work panicked");
                Outcome::transport_failure(format!("work panicked: {message}"))
            }
        };

        registration.finish(outcome, started.elapsed())
    }

    /// Run the work on the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Settled>
    where
        F: Send + 'static,
    {
        tokio::spawn(self.settle())
    }
}

/// Ties a request's sequence number to its coordinator until it settles.
/// Dropping it unsettled cancels the request if it is still active.
struct Registration {
    coordinator: Coordinator,
    key: ActionKey,
    seq: u64,
    span: Span,
    settled: bool,
}

impl Registration {
    fn finish(&mut self, outcome: Outcome, elapsed: Duration) -> Settled {
        self.settled = true;
        let duration_ms = elapsed.as_millis() as u64;

        let (disposition, handler) = {
            let mut inner = self.coordinator.lock();
            let Inner {
                classes,
                retired_seq,
                events,
            } = &mut *inner;
            let class = Inner::class(classes, *retired_seq, &self.key);

            let settled = if class.active == Some(self.seq) {
                class.active = None;
                events.record(EventKind::RequestDelivered {
                    key: self.key.clone(),
                    request_seq: self.seq,
                    success: outcome.is_success(),
                    duration_ms,
                });
                (Disposition::Delivered(outcome), class.handler.clone())
            } else {
                let label = class
                    .labelled
                    .remove(&self.seq)
                    .unwrap_or(Disposition::Cancelled);
                events.record(EventKind::OutcomeDiscarded {
                    key: self.key.clone(),
                    request_seq: self.seq,
                });
                (label, None)
            };
            inner.prune(&self.key);
            settled
        };

        let state = disposition.state();
        record_state_transition(&self.span, "active", &state.to_string());
        metrics::requests_settled().add(
            1,
            &[
                KeyValue::new("key", self.key.to_string()),
                KeyValue::new("result", state.to_string()),
            ],
        );

        match &disposition {
            Disposition::Delivered(outcome) => {
                self.span.in_scope(|| {
                    info!(result = outcome.label(), duration_ms, "outcome delivered");
                });
                if let Some(handler) = handler {
                    handler(Delivery {
                        key: self.key.clone(),
                        seq: self.seq,
                        outcome: outcome.clone(),
                    });
                }
            }
            other => {
                self.span.in_scope(|| {
                    debug!(state = %other.state(), duration_ms, "outcome discarded");
                });
            }
        }

        Settled {
            key: self.key.clone(),
            seq: self.seq,
            disposition,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.coordinator.lock();
        let Inner {
            classes, events, ..
        } = &mut *inner;
        let Some(class) = classes.get_mut(&self.key) else {
            return;
        };
        if class.active == Some(self.seq) {
            class.active = None;
            events.record(EventKind::RequestCancelled {
                key: self.key.clone(),
                request_seq: self.seq,
            });
            debug!(key = %self.key, seq = self.seq, "unsettled dispatch dropped");
        } else {
            class.labelled.remove(&self.seq);
        }
        inner.prune(&self.key);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
