//! Core data model.
//!
//! An action is something the user asked for. It has identity (name + id),
//! an idempotency class key, parameters, and the request shape a transport
//! needs to carry it out. A request is one dispatched attempt at an action;
//! an outcome is what that attempt produced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Action key
// ---------------------------------------------------------------------------

/// Idempotency class key. Requests sharing a key supersede each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionKey(String);

impl ActionKey {
    /// Validate a raw key. Empty, whitespace-only, or control-character
    /// keys are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
            return Err(Error::InvalidAction(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ActionKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ActionKey> for String {
    fn from(key: ActionKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Newtype for action IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{s}")
    }
}

/// A user-triggered unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,

    /// What the user asked for (e.g., "get_price", "buy").
    pub name: String,

    /// Idempotency class. Raw until dispatch; the coordinator validates it.
    pub key: String,

    pub method: Method,

    /// Endpoint path relative to the transport's base URL.
    pub path: String,

    /// Parameters. Query string for GET, JSON object body for POST.
    pub params: BTreeMap<String, String>,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            key: key.into(),
            method,
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The transport-facing view of this action.
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor {
            action: self.name.clone(),
            method: self.method,
            path: self.path.clone(),
            params: self.params.clone(),
        }
    }
}

/// Everything a transport needs to perform one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub action: String,
    pub method: Method,
    pub path: String,
    pub params: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Request state
// ---------------------------------------------------------------------------

/// Lifecycle state of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Dispatched, work in flight, latest for its key.
    Active,
    /// Outcome handed to the handler. Terminal.
    Delivered,
    /// A newer dispatch for the same key arrived first. Terminal.
    Superseded,
    /// The key was cancelled while this request was active. Terminal.
    Cancelled,
}

impl RequestState {
    pub fn can_transition_to(self, to: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, to),
            (Active, Delivered) | (Active, Superseded) | (Active, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestState::Active)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestState::Active => "active",
            RequestState::Delivered => "delivered",
            RequestState::Superseded => "superseded",
            RequestState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of a request. The success payload is opaque to the
/// coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: serde_json::Value },
    Failure(Failure),
}

impl Outcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Outcome::Success { payload }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Outcome::Failure(Failure {
            kind: FailureKind::TransportFailure,
            message: message.into(),
            status: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(f) => Some(f),
            Outcome::Success { .. } => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure(f) => f.kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status, when the server answered at all.
    pub status: Option<u16>,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation could not complete: network error, timeout,
    /// non-success status, undecodable body. When the server explained a
    /// non-success status, its text is the failure message.
    TransportFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransportFailure => "transport_failure",
        }
    }
}
