//! Terminal results of refinement tasks.
//!
//! Exactly one outcome is produced per task, after its retry sequence ends.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ticket::{RefinementTask, TaskKind};

/// Terminal status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Per-ticket failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Provider throttled the request
    RateLimited,

    /// Timeout, connection failure, 5xx-equivalent
    Transient,

    /// Malformed request, auth failure, content-policy rejection
    Permanent,

    /// Skipped because the run was cancelled before the task started
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Transient => "Transient",
            ErrorKind::Permanent => "Permanent",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Failure detail captured from the last attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of refining one ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub task: RefinementTask,

    pub status: OutcomeStatus,

    /// Generated text (Success only)
    pub content: Option<String>,

    /// Last error seen (Failed only)
    pub error: Option<ErrorInfo>,

    /// Number of model invocations made for this task
    pub attempts: u32,

    /// Wall time spent on the task, including backoff
    #[serde(default)]
    pub duration_ms: u64,
}

impl RefinementOutcome {
    pub fn success(task: RefinementTask, content: String, attempts: u32) -> Self {
        Self {
            task,
            status: OutcomeStatus::Success,
            content: Some(content),
            error: None,
            attempts,
            duration_ms: 0,
        }
    }

    pub fn failed(task: RefinementTask, error: ErrorInfo, attempts: u32) -> Self {
        Self {
            task,
            status: OutcomeStatus::Failed,
            content: None,
            error: Some(error),
            attempts,
            duration_ms: 0,
        }
    }

    /// Outcome for a task that never reached the model
    pub fn cancelled(task: RefinementTask) -> Self {
        Self::failed(
            task,
            ErrorInfo::new(ErrorKind::Cancelled, "run cancelled before task started"),
            0,
        )
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn key(&self) -> &str {
        self.task.key()
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Index warning line, e.g. "C-2: Permanent after 1 attempts"
    pub fn warning(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let kind = self.error_kind().unwrap_or(ErrorKind::Permanent);
        Some(format!("{}: {} after {} attempts", self.key(), kind, self.attempts))
    }
}
