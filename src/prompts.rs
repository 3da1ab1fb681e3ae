//! Prompt construction for refinement tasks.
//!
//! The core treats prompt building as an opaque `task -> String` function.
//! [`DefaultPromptBuilder`] asks the model for the line-marker format the
//! aggregator scans (`TITLE:`, `SUMMARY:`, `QUESTION:`, `GAP:`,
//! `SUGGESTED TICKET:`).

use serde_json::json;

use crate::domain::{RefinementTask, TaskKind, Ticket};

/// Renders a prompt for a task
pub trait PromptBuilder: Send + Sync {
    fn build(&self, task: &RefinementTask) -> String;
}

impl<F> PromptBuilder for F
where
    F: Fn(&RefinementTask) -> String + Send + Sync,
{
    fn build(&self, task: &RefinementTask) -> String {
        self(task)
    }
}

const CHILD_INSTRUCTIONS: &str = "Refine this ticket. Tailor tone to the issue type: \
Bug (repro and verification), Sub-task (inherits parent scope), Story/Task (user-facing outcomes). \
Acceptance criteria must use Given/When/Then.";

const EPIC_INSTRUCTIONS: &str = "Refine this epic. Produce a crisp narrative, an outcome \
statement, epic-level acceptance criteria (Given/When/Then), key risks, and constraints or NFRs \
if implied. Assess ambition: would the child tickets deliver a meaningful outcome?";

const FORMAT_INSTRUCTIONS: &str = "Format rules:\n\
- First line: `TITLE: <refined title>`\n\
- Second line: `SUMMARY: <one-paragraph summary>`\n\
- Then the refined body in Markdown.\n\
- Each open question on its own line as `QUESTION: <question>`.\n\
- Each missing piece of information as `GAP: <gap>`.\n\
- Each missing work item worth a new ticket as `SUGGESTED TICKET: <title> - <outcome>`.\n\
Do not invent facts.";

const EXAMPLE_BLOCK_START: &str = "### EXAMPLE FORMAT START";
const EXAMPLE_BLOCK_END: &str = "### EXAMPLE FORMAT END";

/// Prompt builder used by the CLI
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptBuilder {
    /// Project name shown to the model
    pub project: String,

    /// Epic title used as context for child tickets
    pub epic_title: String,

    /// Optional output example to mirror
    pub example_format: Option<String>,

    /// Truncate descriptions longer than this many characters (0 = never)
    pub truncation_chars: usize,
}

impl DefaultPromptBuilder {
    pub fn new(project: impl Into<String>, epic_title: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            epic_title: epic_title.into(),
            ..Default::default()
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example_format = Some(example.into());
        self
    }

    pub fn with_truncation(mut self, chars: usize) -> Self {
        self.truncation_chars = chars;
        self
    }

    fn ticket_payload(&self, ticket: &Ticket) -> serde_json::Value {
        let description = truncate_description(&ticket.description, self.truncation_chars);
        json!({
            "key": ticket.key,
            "issue_type": ticket.issue_type,
            "summary": ticket.summary,
            "description": description,
            "status": ticket.status,
            "labels": ticket.labels,
            "priority": ticket.priority,
        })
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, task: &RefinementTask) -> String {
        let (instructions, payload) = match task.kind {
            TaskKind::Epic => (
                EPIC_INSTRUCTIONS,
                json!({
                    "project": self.project,
                    "epic": self.ticket_payload(&task.ticket),
                }),
            ),
            TaskKind::Child => (
                CHILD_INSTRUCTIONS,
                json!({
                    "project": self.project,
                    "epic_title": self.epic_title,
                    "ticket": self.ticket_payload(&task.ticket),
                }),
            ),
        };

        let payload =
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());

        let mut prompt = format!("{}\n\n{}\n\n{}", instructions, payload, FORMAT_INSTRUCTIONS);

        if let Some(example) = self
            .example_format
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            prompt.push_str(&format!(
                "\n\nIf an EXAMPLE FORMAT is provided, match its structure and headings exactly.\n{}\n{}\n{}",
                EXAMPLE_BLOCK_START, example, EXAMPLE_BLOCK_END
            ));
        }

        prompt
    }
}

/// Cut a description at `limit` characters and append a note (0 = no limit)
pub fn truncate_description(text: &str, limit: usize) -> String {
    if limit == 0 || text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!(
        "{}\n\n[Description truncated after {} characters]",
        cut.trim_end(),
        limit
    )
}
