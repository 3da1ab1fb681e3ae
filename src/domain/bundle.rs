//! The aggregated artefact bundle and its run index.
//!
//! A bundle is built once per run from the complete outcome set and is never
//! partially materialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::ErrorKind;

/// A named text document in the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artefact {
    pub kind: ArtefactKind,

    /// File name used by writers (e.g. "stories.md")
    pub name: String,

    pub content: String,
}

impl Artefact {
    pub fn new(kind: ArtefactKind, content: String) -> Self {
        Self {
            kind,
            name: kind.file_name().to_string(),
            content,
        }
    }
}

/// Kinds of artefacts, in bundle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtefactKind {
    /// Epic narrative
    Epic,

    /// Refined child stories
    Stories,

    /// Open questions and gaps, grouped by ticket
    Actions,

    /// Suggested new tickets
    SuggestedTickets,

    /// Key/title/summary table
    Digest,

    /// Human-readable run index
    Index,
}

impl ArtefactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtefactKind::Epic => "epic.md",
            ArtefactKind::Stories => "stories.md",
            ArtefactKind::Actions => "actions.md",
            ArtefactKind::SuggestedTickets => "suggested_new_tickets.md",
            ArtefactKind::Digest => "refined_tickets.csv",
            ArtefactKind::Index => "index.md",
        }
    }
}

/// A ticket missing from the narrative artefacts, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTicket {
    pub key: String,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

/// Authoritative record of run completeness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndex {
    /// "<epic key>_<YYYYmmdd_HHMMSS>", used for output directory naming
    pub run_id: String,

    pub epic_key: String,

    pub timestamp: DateTime<Utc>,

    pub total_tickets: usize,

    pub succeeded: usize,

    pub failed: usize,

    /// Keys of successfully refined tickets, in ticket order
    pub refined_keys: Vec<String>,

    pub failed_tickets: Vec<FailedTicket>,

    /// One line per failed ticket
    pub warnings: Vec<String>,

    /// Responses replayed from the response cache instead of the model
    #[serde(default)]
    pub cache_hits: usize,
}

impl RunIndex {
    /// Every task accounted for exactly once
    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed == self.total_tickets
            && self.failed_tickets.len() == self.failed
            && self.refined_keys.len() == self.succeeded
    }
}

/// Aggregated output of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtefactBundle {
    pub artefacts: Vec<Artefact>,
    pub index: RunIndex,
}

impl ArtefactBundle {
    /// Look up an artefact by kind
    pub fn get(&self, kind: ArtefactKind) -> Option<&Artefact> {
        self.artefacts.iter().find(|a| a.kind == kind)
    }

    /// Machine-readable index
    pub fn index_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.index)
    }
}
