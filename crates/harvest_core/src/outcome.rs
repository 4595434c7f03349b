use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{RecordPayload, WorkItem};

/// Position of a source in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Primary,
    Secondary,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::Primary => f.write_str("primary"),
            SourceRole::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Network,
    HttpStatus(u16),
    Decode,
    /// The rate limiter was closed while waiting for a token.
    LimiterClosed,
    /// Misconfiguration or an adapter that cannot be built.
    Fatal,
    Other,
}

impl FailureKind {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Decode => write!(f, "decode error"),
            FailureKind::LimiterClosed => write!(f, "rate limiter closed"),
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }
}

/// Terminal result of resolving one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(RecordPayload),
    /// No data exists yet. Not an error.
    Empty,
    Transient(FetchError),
    Fatal(FetchError),
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::Empty => "empty",
            FetchOutcome::Transient(_) => "transient",
            FetchOutcome::Fatal(_) => "fatal",
        }
    }

    /// Classifies an adapter error: `Fatal` kinds stay fatal, everything else is transient.
    pub fn from_error(err: FetchError) -> Self {
        if err.kind == FailureKind::Fatal {
            FetchOutcome::Fatal(err)
        } else {
            FetchOutcome::Transient(err)
        }
    }
}

/// A validated success queued for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub item: WorkItem,
    pub payload: RecordPayload,
    pub source: SourceRole,
}

impl BatchRecord {
    pub fn new(item: WorkItem, payload: RecordPayload, source: SourceRole) -> Self {
        Self {
            item,
            payload,
            source,
        }
    }

    pub fn identity(&self) -> String {
        self.item.identity()
    }
}
