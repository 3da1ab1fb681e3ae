//! Ticket records and the validated epic/child graph.
//!
//! Tickets are immutable once loaded. A run always refines exactly one epic
//! plus the children that reference it.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A single issue-tracker record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Issue key (e.g. "PAY-123")
    pub key: String,

    /// One-line summary
    #[serde(default)]
    pub summary: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Key of the parent issue (None for the epic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,

    /// Issue type as exported (Story, Bug, Task, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Comma-separated; exports that give a list are joined on load
    #[serde(
        default,
        deserialize_with = "deserialize_labels",
        skip_serializing_if = "Option::is_none"
    )]
    pub labels: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Accept labels as one string or as a list of strings
fn deserialize_labels<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Labels {
        One(String),
        Many(Vec<String>),
    }

    let labels = match Option::<Labels>::deserialize(deserializer)? {
        Some(Labels::One(text)) => Some(text),
        Some(Labels::Many(list)) => Some(list.join(", ")),
        None => None,
    };
    Ok(labels.filter(|l| !l.trim().is_empty()))
}

impl Ticket {
    /// Create a ticket with the core fields only
    pub fn new(
        key: impl Into<String>,
        summary: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            summary: summary.into(),
            description: description.into(),
            parent_key: None,
            issue_type: None,
            status: None,
            labels: None,
            priority: None,
        }
    }

    /// Set the parent reference
    pub fn with_parent(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }

    /// Set the issue type
    pub fn with_issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = Some(issue_type.into());
        self
    }

    /// Parent key with blank values treated as absent
    pub fn parent(&self) -> Option<&str> {
        self.parent_key
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Whether a task refines the epic or one of its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Epic,
    Child,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Epic => write!(f, "epic"),
            TaskKind::Child => write!(f, "child"),
        }
    }
}

/// One unit of refinement work. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementTask {
    pub ticket: Ticket,
    pub kind: TaskKind,
}

impl RefinementTask {
    pub fn new(ticket: Ticket, kind: TaskKind) -> Self {
        Self { ticket, kind }
    }

    pub fn key(&self) -> &str {
        &self.ticket.key
    }
}

/// Ticket graph errors. Fatal to the whole run, raised before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Epic ticket has an empty key")]
    EmptyEpicKey,

    #[error("Child ticket at position {position} has an empty key")]
    EmptyChildKey { position: usize },

    #[error("Ticket '{key}' has no parent key; expected epic '{epic}'")]
    MissingParent { key: String, epic: String },

    #[error("Ticket '{key}' references parent '{parent}', which is not the epic '{epic}'")]
    OrphanedChild {
        key: String,
        parent: String,
        epic: String,
    },

    #[error("Duplicate ticket key '{key}'")]
    DuplicateKey { key: String },

    #[error("No epic ticket found")]
    NoEpic,

    #[error("Designated epic '{key}' not found among tickets")]
    EpicNotFound { key: String },

    #[error("Multiple epic candidates found: {}. Expected exactly one", .keys.join(", "))]
    MultipleEpics { keys: Vec<String> },
}

/// A validated epic plus its ordered children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketSet {
    epic: Ticket,
    children: Vec<Ticket>,
}

impl TicketSet {
    /// Validate an epic and its children.
    ///
    /// Every child must reference the epic by key, and keys must be unique
    /// across the run. Child order is preserved.
    pub fn new(epic: Ticket, children: Vec<Ticket>) -> Result<Self, ValidationError> {
        let epic_key = epic.key.trim();
        if epic_key.is_empty() {
            return Err(ValidationError::EmptyEpicKey);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(epic_key);

        for (position, child) in children.iter().enumerate() {
            let key = child.key.trim();
            if key.is_empty() {
                return Err(ValidationError::EmptyChildKey { position });
            }

            match child.parent() {
                None => {
                    return Err(ValidationError::MissingParent {
                        key: key.to_string(),
                        epic: epic_key.to_string(),
                    })
                }
                Some(parent) if parent != epic_key => {
                    return Err(ValidationError::OrphanedChild {
                        key: key.to_string(),
                        parent: parent.to_string(),
                        epic: epic_key.to_string(),
                    })
                }
                Some(_) => {}
            }

            if !seen.insert(key) {
                return Err(ValidationError::DuplicateKey {
                    key: key.to_string(),
                });
            }
        }

        Ok(Self { epic, children })
    }

    /// Split a flat ticket list into epic and children, then validate.
    ///
    /// With `epic_key` set, that ticket is the epic. Otherwise the epic is the
    /// single ticket without a parent reference.
    pub fn from_tickets(
        tickets: Vec<Ticket>,
        epic_key: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let epic_index = match epic_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => tickets
                .iter()
                .position(|t| t.key.trim() == key)
                .ok_or_else(|| ValidationError::EpicNotFound {
                    key: key.to_string(),
                })?,
            None => {
                let candidates: Vec<usize> = tickets
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.parent().is_none())
                    .map(|(i, _)| i)
                    .collect();

                match candidates.as_slice() {
                    [] => return Err(ValidationError::NoEpic),
                    [single] => *single,
                    many => {
                        return Err(ValidationError::MultipleEpics {
                            keys: many.iter().map(|&i| tickets[i].key.clone()).collect(),
                        })
                    }
                }
            }
        };

        let mut tickets = tickets;
        let epic = tickets.remove(epic_index);
        Self::new(epic, tickets)
    }

    pub fn epic(&self) -> &Ticket {
        &self.epic
    }

    pub fn children(&self) -> &[Ticket] {
        &self.children
    }

    /// Total number of refinement tasks (epic + children)
    pub fn len(&self) -> usize {
        1 + self.children.len()
    }

    /// Always false: a set holds at least the epic
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Build tasks in submission order: epic first, then children
    pub fn tasks(&self) -> Vec<RefinementTask> {
        std::iter::once(RefinementTask::new(self.epic.clone(), TaskKind::Epic))
            .chain(
                self.children
                    .iter()
                    .cloned()
                    .map(|t| RefinementTask::new(t, TaskKind::Child)),
            )
            .collect()
    }
}
