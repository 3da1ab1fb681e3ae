//! Reduces refinement outcomes into the artefact bundle.
//!
//! Aggregation is pure: the same outcomes and timestamp always produce
//! byte-identical artefacts. Text order follows ticket order, never
//! completion order.
//!
//! Model output is scanned line by line for markers (case-insensitive,
//! optional leading bullet):
//!
//! | Marker              | Destination                    |
//! |---------------------|--------------------------------|
//! | `TITLE:`            | refined title (first wins)     |
//! | `SUMMARY:`          | refined summary (first wins)   |
//! | `QUESTION:`, `GAP:` | actions.md                     |
//! | `SUGGESTED TICKET:` | suggested_new_tickets.md       |
//!
//! Everything else is narrative body.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::{
    Artefact, ArtefactBundle, ArtefactKind, ErrorKind, FailedTicket, RefinementOutcome, RunIndex,
    TaskKind,
};

const TITLE_MARKER: &str = "TITLE";
const SUMMARY_MARKER: &str = "SUMMARY";
const QUESTION_MARKER: &str = "QUESTION";
const GAP_MARKER: &str = "GAP";
const SUGGESTION_MARKER: &str = "SUGGESTED TICKET";

/// Longest refined summary accepted without a review note
pub const MAX_SUMMARY_CHARS: usize = 500;

/// Vague words that should not survive refinement
const WEASEL_WORDS: [&str; 3] = ["etc", "tbd", "asap"];

const DIGEST_HEADER: [&str; 3] = ["Issue key", "Refined Title", "Refined Summary"];

/// Annotations extracted from one model response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Questions and gaps, in order of appearance
    pub actions: Vec<String>,
    pub suggestions: Vec<String>,
    /// Content with marker lines removed
    pub body: String,
}

impl Annotations {
    pub fn scan(content: &str) -> Self {
        let mut annotations = Self::default();
        let mut body: Vec<&str> = Vec::new();

        for line in content.lines() {
            let bare = line.trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == '*');

            if let Some(value) = strip_marker(bare, TITLE_MARKER) {
                annotations.title.get_or_insert_with(|| value.to_string());
            } else if let Some(value) = strip_marker(bare, SUMMARY_MARKER) {
                annotations.summary.get_or_insert_with(|| value.to_string());
            } else if let Some(value) = strip_marker(bare, QUESTION_MARKER) {
                push_non_empty(&mut annotations.actions, value.to_string());
            } else if let Some(value) = strip_marker(bare, GAP_MARKER) {
                if !value.is_empty() {
                    annotations.actions.push(format!("Gap: {}", value));
                }
            } else if let Some(value) = strip_marker(bare, SUGGESTION_MARKER) {
                push_non_empty(&mut annotations.suggestions, value.to_string());
            } else {
                body.push(line.trim_end());
            }
        }

        annotations.title = annotations.title.filter(|t| !t.is_empty());
        annotations.summary = annotations.summary.filter(|s| !s.is_empty());
        annotations.body = body.join("\n").trim_matches('\n').to_string();
        annotations
    }
}

/// Quality review of one successful response; empty when nothing to flag
pub fn lint(annotations: &Annotations) -> Vec<String> {
    let mut issues = Vec::new();

    match annotations.title.as_deref() {
        None => issues.push("Missing title".to_string()),
        Some(title) if contains_weasel_word(title) => {
            issues.push("Title contains weasel words".to_string())
        }
        Some(_) => {}
    }

    match annotations.summary.as_deref() {
        None => issues.push("Missing summary".to_string()),
        Some(summary) => {
            if summary.chars().count() > MAX_SUMMARY_CHARS {
                issues.push(format!("Summary exceeds {} characters", MAX_SUMMARY_CHARS));
            }
            if contains_weasel_word(summary) {
                issues.push("Summary contains weasel words".to_string());
            }
        }
    }

    issues
}

/// Whole-word, case-insensitive match ("fetch" does not contain "etc")
fn contains_weasel_word(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| WEASEL_WORDS.iter().any(|w| word.eq_ignore_ascii_case(w)))
}

/// Match `MARKER:` at the start of a line, ignoring case; returns the trimmed value
fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let head = line.get(..marker.len())?;
    if !head.eq_ignore_ascii_case(marker) {
        return None;
    }
    line[marker.len()..]
        .trim_start()
        .strip_prefix(':')
        .map(str::trim)
        .map(|v| v.trim_matches('*').trim())
}

fn push_non_empty(target: &mut Vec<String>, value: String) {
    if !value.is_empty() {
        target.push(value);
    }
}

/// An outcome paired with its scanned annotations (None unless successful)
struct Scanned<'a> {
    outcome: &'a RefinementOutcome,
    annotations: Option<Annotations>,
}

impl Scanned<'_> {
    fn title(&self) -> String {
        self.annotations
            .as_ref()
            .and_then(|a| a.title.clone())
            .unwrap_or_else(|| fallback_title(self.outcome))
    }

    fn summary(&self) -> String {
        self.annotations
            .as_ref()
            .and_then(|a| a.summary.clone())
            .unwrap_or_default()
    }
}

fn fallback_title(outcome: &RefinementOutcome) -> String {
    let summary = outcome.task.ticket.summary.trim();
    if summary.is_empty() {
        outcome.key().to_string()
    } else {
        summary.to_string()
    }
}

fn failure_note(outcome: &RefinementOutcome) -> String {
    let kind = outcome.error_kind().unwrap_or(ErrorKind::Permanent);
    format!(
        "_Refinement failed: {} after {} attempts. See {}._",
        kind,
        outcome.attempts,
        ArtefactKind::Index.file_name()
    )
}

/// Output directory name: "<epic key>_<YYYYmmdd_HHMMSS>"
pub fn run_id(epic_key: &str, timestamp: DateTime<Utc>) -> String {
    let key = epic_key.trim();
    let key = if key.is_empty() { "unknown" } else { key };
    format!(
        "{}_{}",
        key.replace(|c: char| c.is_whitespace() || c == '/', "_"),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Build the bundle from the complete outcome set
pub fn aggregate(outcomes: &[RefinementOutcome], generated_at: DateTime<Utc>) -> ArtefactBundle {
    aggregate_with_cache_hits(outcomes, generated_at, 0)
}

/// As [`aggregate`], recording how many responses came from the cache
pub fn aggregate_with_cache_hits(
    outcomes: &[RefinementOutcome],
    generated_at: DateTime<Utc>,
    cache_hits: usize,
) -> ArtefactBundle {
    let scanned: Vec<Scanned<'_>> = outcomes
        .iter()
        .map(|outcome| Scanned {
            outcome,
            annotations: outcome
                .content
                .as_deref()
                .filter(|_| outcome.is_success())
                .map(Annotations::scan),
        })
        .collect();

    let epic = scanned.iter().find(|s| s.outcome.kind() == TaskKind::Epic);
    let children: Vec<&Scanned<'_>> = scanned
        .iter()
        .filter(|s| s.outcome.kind() == TaskKind::Child)
        .collect();

    let index = build_index(outcomes, generated_at, cache_hits);

    let artefacts = vec![
        Artefact::new(ArtefactKind::Epic, render_epic(epic, &children)),
        Artefact::new(ArtefactKind::Stories, render_stories(&children)),
        Artefact::new(ArtefactKind::Actions, render_actions(&scanned)),
        Artefact::new(ArtefactKind::SuggestedTickets, render_suggestions(&scanned)),
        Artefact::new(ArtefactKind::Digest, render_digest(&scanned)),
        Artefact::new(ArtefactKind::Index, render_index(&index)),
    ];

    ArtefactBundle { artefacts, index }
}

fn build_index(
    outcomes: &[RefinementOutcome],
    generated_at: DateTime<Utc>,
    cache_hits: usize,
) -> RunIndex {
    let epic_key = outcomes
        .iter()
        .find(|o| o.kind() == TaskKind::Epic)
        .or_else(|| outcomes.first())
        .map(|o| o.key().to_string())
        .unwrap_or_default();

    let refined_keys: Vec<String> = outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| o.key().to_string())
        .collect();

    let failed_tickets: Vec<FailedTicket> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| FailedTicket {
            key: o.key().to_string(),
            kind: o.error_kind().unwrap_or(ErrorKind::Permanent),
            attempts: o.attempts,
            message: o
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        })
        .collect();

    let warnings: Vec<String> = outcomes.iter().filter_map(|o| o.warning()).collect();

    RunIndex {
        run_id: run_id(&epic_key, generated_at),
        epic_key,
        timestamp: generated_at,
        total_tickets: outcomes.len(),
        succeeded: refined_keys.len(),
        failed: failed_tickets.len(),
        refined_keys,
        failed_tickets,
        warnings,
        cache_hits,
    }
}

fn finish(parts: Vec<String>) -> String {
    let mut text = parts.join("\n").trim_end().to_string();
    text.push('\n');
    text
}

fn render_epic(epic: Option<&Scanned<'_>>, children: &[&Scanned<'_>]) -> String {
    let mut parts = Vec::new();

    match epic {
        Some(scanned) => {
            parts.push(format!("# {}", scanned.title()));
            parts.push(String::new());
            parts.push(format!("**Epic:** {}", scanned.outcome.key()));

            match &scanned.annotations {
                Some(annotations) => {
                    if let Some(summary) = &annotations.summary {
                        parts.push(String::new());
                        parts.push(summary.clone());
                    }
                    if !annotations.body.is_empty() {
                        parts.push(String::new());
                        parts.push(annotations.body.clone());
                    }
                }
                None => {
                    parts.push(String::new());
                    parts.push(failure_note(scanned.outcome));
                }
            }
        }
        None => {
            parts.push("# Epic".to_string());
            parts.push(String::new());
            parts.push(format!(
                "_No epic outcome recorded. See {}._",
                ArtefactKind::Index.file_name()
            ));
        }
    }

    let refined = children.iter().filter(|c| c.outcome.is_success()).count();
    parts.extend([
        String::new(),
        "## Related".to_string(),
        format!(
            "- Stories: {} ({} of {} refined)",
            ArtefactKind::Stories.file_name(),
            refined,
            children.len()
        ),
        format!("- Actions: {}", ArtefactKind::Actions.file_name()),
        format!(
            "- Suggested tickets: {}",
            ArtefactKind::SuggestedTickets.file_name()
        ),
        format!("- Index: {}", ArtefactKind::Index.file_name()),
    ]);

    finish(parts)
}

fn render_stories(children: &[&Scanned<'_>]) -> String {
    let mut parts = vec!["# Refined Tickets".to_string(), String::new()];

    if children.is_empty() {
        parts.push("_No child tickets in this epic._".to_string());
        return finish(parts);
    }

    for child in children {
        parts.push(format!("### {} · {}", child.outcome.key(), child.title()));
        parts.push(String::new());

        match &child.annotations {
            Some(annotations) => {
                if let Some(summary) = &annotations.summary {
                    parts.push(summary.clone());
                    parts.push(String::new());
                }
                if !annotations.body.is_empty() {
                    parts.push(annotations.body.clone());
                    parts.push(String::new());
                }
                if !annotations.actions.is_empty() {
                    parts.push(format!(
                        "_Open questions for {} are listed in {}._",
                        child.outcome.key(),
                        ArtefactKind::Actions.file_name()
                    ));
                    parts.push(String::new());
                }
                let issues = lint(annotations);
                if !issues.is_empty() {
                    parts.push("> _Output needs review:_".to_string());
                    parts.extend(issues.iter().map(|issue| format!("> - {}", issue)));
                    parts.push(String::new());
                }
            }
            None => {
                parts.push(failure_note(child.outcome));
                parts.push(String::new());
            }
        }
    }

    finish(parts)
}

fn render_actions(scanned: &[Scanned<'_>]) -> String {
    let mut parts = vec!["# Actions and Open Questions".to_string(), String::new()];

    let with_actions: Vec<(&str, &[String])> = scanned
        .iter()
        .filter_map(|s| {
            s.annotations
                .as_ref()
                .filter(|a| !a.actions.is_empty())
                .map(|a| (s.outcome.key(), a.actions.as_slice()))
        })
        .collect();

    if with_actions.is_empty() {
        parts.push("_No outstanding questions identified._".to_string());
        return finish(parts);
    }

    for (key, actions) in with_actions {
        parts.push(format!("## {}", key));
        parts.extend(actions.iter().map(|a| format!("- {}", a)));
        parts.push(String::new());
    }

    finish(parts)
}

fn render_suggestions(scanned: &[Scanned<'_>]) -> String {
    let mut parts = vec!["# Suggested New Tickets".to_string(), String::new()];

    let suggestions: Vec<(&str, &String)> = scanned
        .iter()
        .filter_map(|s| s.annotations.as_ref().map(|a| (s.outcome.key(), a)))
        .flat_map(|(key, a)| a.suggestions.iter().map(move |text| (key, text)))
        .collect();

    if suggestions.is_empty() {
        parts.push("_No additional tickets suggested._".to_string());
        return finish(parts);
    }

    for (number, (key, text)) in suggestions.into_iter().enumerate() {
        parts.push(format!("{}. {} _(from {})_", number + 1, text, key));
    }

    finish(parts)
}

fn render_digest(scanned: &[Scanned<'_>]) -> String {
    let mut rows = vec![csv_row(&DIGEST_HEADER)];

    for s in scanned.iter().filter(|s| s.annotations.is_some()) {
        let title = s.title();
        let summary = s.summary();
        rows.push(csv_row(&[s.outcome.key(), &title, &summary]));
    }

    let mut text = rows.join("\n");
    text.push('\n');
    text
}

fn csv_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// RFC 4180 quoting: wrap in quotes when needed, double embedded quotes
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_index(index: &RunIndex) -> String {
    let mut parts = vec![
        "# Epic Pack Summary".to_string(),
        String::new(),
        format!("- **Run:** {}", index.run_id),
        format!("- **Epic:** {}", index.epic_key),
        format!("- **Total tickets:** {}", index.total_tickets),
        format!("- **Succeeded:** {}", index.succeeded),
        format!("- **Failed:** {}", index.failed),
        format!("- **Cache hits:** {}", index.cache_hits),
        String::new(),
    ];

    if index.total_tickets > 0 && index.succeeded == 0 {
        parts.push(
            "_No tickets were refined successfully; narrative artefacts contain no refined content._"
                .to_string(),
        );
        parts.push(String::new());
    }

    parts.push("## Failed tickets".to_string());
    if index.failed_tickets.is_empty() {
        parts.push("_None._".to_string());
    } else {
        for failed in &index.failed_tickets {
            parts.push(format!(
                "- {}: {} after {} attempts - {}",
                failed.key, failed.kind, failed.attempts, failed.message
            ));
        }
    }
    parts.push(String::new());

    parts.push("## Artefacts".to_string());
    for kind in [
        ArtefactKind::Epic,
        ArtefactKind::Stories,
        ArtefactKind::Actions,
        ArtefactKind::SuggestedTickets,
        ArtefactKind::Digest,
    ] {
        parts.push(format!("- {}", kind.file_name()));
    }
    parts.push("- index.json".to_string());
    parts.push(String::new());

    let refined = if index.refined_keys.is_empty() {
        "None".to_string()
    } else {
        index.refined_keys.join(", ")
    };
    parts.extend([
        "## Traceability".to_string(),
        format!(
            "- Generated: {}",
            index.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        format!("- Refined tickets: {}", refined),
    ]);

    finish(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorInfo, RefinementTask, Ticket};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 5, 9, 30, 0).unwrap()
    }

    fn success(key: &str, kind: TaskKind, content: &str) -> RefinementOutcome {
        let mut ticket = Ticket::new(key, format!("{} original", key), "");
        if kind == TaskKind::Child {
            ticket = ticket.with_parent("E-1");
        }
        RefinementOutcome::success(RefinementTask::new(ticket, kind), content.to_string(), 1)
    }

    #[test]
    fn test_scan_markers() {
        let content = "TITLE: Faster checkout\n\
                       summary: One-tap payments\n\
                       \n\
                       Body line one.\n\
                       - QUESTION: Which PSP?\n\
                       * Gap: No error budget\n\
                       SUGGESTED TICKET: Add payment alerts - on-call sees failures\n\
                       TITLE: ignored second title\n";
        let a = Annotations::scan(content);

        assert_eq!(a.title.as_deref(), Some("Faster checkout"));
        assert_eq!(a.summary.as_deref(), Some("One-tap payments"));
        assert_eq!(a.actions, vec!["Which PSP?", "Gap: No error budget"]);
        assert_eq!(
            a.suggestions,
            vec!["Add payment alerts - on-call sees failures"]
        );
        assert_eq!(a.body, "Body line one.");
    }

    #[test]
    fn test_scan_ignores_words_that_merely_start_with_marker() {
        let a = Annotations::scan("Gaps remain in monitoring\nTitleholder: none");
        assert!(a.actions.is_empty());
        assert!(a.title.is_none());
        assert_eq!(a.body, "Gaps remain in monitoring\nTitleholder: none");
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a, b"), "\"a, b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_run_id() {
        assert_eq!(run_id("E-1", ts()), "E-1_20241105_093000");
        assert_eq!(run_id("My Epic", ts()), "My_Epic_20241105_093000");
        assert_eq!(run_id("", ts()), "unknown_20241105_093000");
    }

    #[test]
    fn test_digest_uses_fallback_title() {
        let outcomes = vec![
            success("E-1", TaskKind::Epic, "TITLE: Checkout, reimagined\nSUMMARY: Faster"),
            success("C-1", TaskKind::Child, "No markers here"),
        ];
        let bundle = aggregate(&outcomes, ts());
        let digest = &bundle.get(ArtefactKind::Digest).unwrap().content;

        assert_eq!(
            digest,
            "Issue key,Refined Title,Refined Summary\n\
             E-1,\"Checkout, reimagined\",Faster\n\
             C-1,C-1 original,\n"
        );
    }

    #[test]
    fn test_actions_grouped_in_ticket_order() {
        let outcomes = vec![
            success("E-1", TaskKind::Epic, "QUESTION: Budget?"),
            success("C-2", TaskKind::Child, "QUESTION: Scope?\nGAP: No designs"),
            success("C-1", TaskKind::Child, "nothing to ask"),
        ];
        let bundle = aggregate(&outcomes, ts());
        let actions = &bundle.get(ArtefactKind::Actions).unwrap().content;

        assert_eq!(
            actions,
            "# Actions and Open Questions\n\n\
             ## E-1\n- Budget?\n\n\
             ## C-2\n- Scope?\n- Gap: No designs\n"
        );

        let stories = &bundle.get(ArtefactKind::Stories).unwrap().content;
        assert!(stories.contains("_Open questions for C-2 are listed in actions.md._"));
        assert!(!stories.contains("Open questions for C-1"));
    }

    #[test]
    fn test_failed_epic_is_flagged_not_fatal() {
        let epic_task = RefinementTask::new(Ticket::new("E-1", "Checkout", ""), TaskKind::Epic);
        let outcomes = vec![
            RefinementOutcome::failed(
                epic_task,
                ErrorInfo::new(ErrorKind::Transient, "timeout"),
                5,
            ),
            success("C-1", TaskKind::Child, "TITLE: Apple Pay"),
        ];
        let bundle = aggregate(&outcomes, ts());

        let epic = &bundle.get(ArtefactKind::Epic).unwrap().content;
        assert!(epic.starts_with("# Checkout\n"));
        assert!(epic.contains("_Refinement failed: Transient after 5 attempts. See index.md._"));
        assert!(epic.contains("- Stories: stories.md (1 of 1 refined)"));

        assert_eq!(bundle.index.epic_key, "E-1");
        assert_eq!(bundle.index.warnings, vec!["E-1: Transient after 5 attempts"]);
        assert!(bundle.index.is_consistent());
    }

    #[test]
    fn test_suggestions_numbered_with_origin() {
        let outcomes = vec![
            success("E-1", TaskKind::Epic, "SUGGESTED TICKET: Runbook"),
            success("C-1", TaskKind::Child, "SUGGESTED TICKET: Feature flag\nSUGGESTED TICKET: Alerts"),
        ];
        let bundle = aggregate(&outcomes, ts());
        let text = &bundle.get(ArtefactKind::SuggestedTickets).unwrap().content;

        assert_eq!(
            text,
            "# Suggested New Tickets\n\n\
             1. Runbook _(from E-1)_\n\
             2. Feature flag _(from C-1)_\n\
             3. Alerts _(from C-1)_\n"
        );
    }

    #[test]
    fn test_empty_outcomes_still_produce_bundle() {
        let bundle = aggregate(&[], ts());

        assert_eq!(bundle.artefacts.len(), 6);
        assert_eq!(bundle.index.total_tickets, 0);
        assert_eq!(bundle.index.run_id, "unknown_20241105_093000");
        assert!(bundle.index.is_consistent());
    }

    #[test]
    fn test_lint_flags_weasel_words_and_long_summary() {
        let long_summary = format!("SUMMARY: {}", "x".repeat(MAX_SUMMARY_CHARS + 1));
        let a = Annotations::scan(&format!("TITLE: Payments, etc.\n{}", long_summary));

        assert_eq!(
            lint(&a),
            vec!["Title contains weasel words", "Summary exceeds 500 characters"]
        );
    }

    #[test]
    fn test_lint_whole_words_only() {
        let a = Annotations::scan("TITLE: Fetch ledger\nSUMMARY: Sketch the TBD rollout");
        assert_eq!(lint(&a), vec!["Summary contains weasel words"]);

        let clean = Annotations::scan("TITLE: Fetch ledger\nSUMMARY: Sketch the rollout");
        assert!(lint(&clean).is_empty());
    }

    #[test]
    fn test_lint_missing_markers_noted_in_stories() {
        let outcomes = vec![
            success("E-1", TaskKind::Epic, "TITLE: Checkout\nSUMMARY: Faster"),
            success("C-1", TaskKind::Child, "Body only"),
            success("C-2", TaskKind::Child, "TITLE: Apple Pay\nSUMMARY: Wallet payments"),
        ];
        let bundle = aggregate(&outcomes, ts());
        let stories = &bundle.get(ArtefactKind::Stories).unwrap().content;

        assert!(stories.contains(
            "Body only\n\n> _Output needs review:_\n> - Missing title\n> - Missing summary\n"
        ));
        assert_eq!(stories.matches("Output needs review").count(), 1);
    }
}
