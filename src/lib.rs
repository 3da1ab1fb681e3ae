//! epic-refiner - Concurrent epic pack refinement
//!
//! Takes one epic and its child tickets, issues one language-model call per
//! ticket under a concurrency cap, and aggregates whatever succeeded into a
//! cross-referenced artefact bundle plus an index of what failed and why.
//!
//! # Architecture
//!
//! Data flows strictly upward:
//! - Ticket model: immutable records, validated as an epic/child graph
//! - Refinement client: one model call per task, with retry/backoff
//! - Orchestrator: bounded fan-out, fan-in in submission order
//! - Aggregator: pure reduction into the artefact bundle
//!
//! A failed ticket never aborts its siblings. Only a malformed ticket graph
//! stops a run, and it does so before any model call.
//!
//! # Modules
//!
//! - `adapters`: Language-model capability (OpenAI-compatible, response cache)
//! - `core`: Retry policy, client, orchestrator, aggregator
//! - `domain`: Data structures (Ticket, RefinementOutcome, ArtefactBundle)
//! - `prompts`: Ticket to prompt rendering
//! - `writer`: Bundle to disk
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Refine an epic pack
//! epic-refiner refine --tickets pack.json --epic PAY-100
//!
//! # Check a ticket file without calling the model
//! epic-refiner validate --tickets pack.json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod prompts;
pub mod writer;

// Re-export main types at crate root for convenience
pub use adapters::{GenerationParams, LanguageModel, ModelError, ModelRequest};
pub use config::RefinerConfig;
pub use core::{
    aggregate, aggregate_with_cache_hits, Orchestrator, RefinementClient, RetryPolicy,
};
pub use domain::{
    ArtefactBundle, ErrorKind, OutcomeStatus, RefinementOutcome, RefinementTask, RunIndex,
    TaskKind, Ticket, TicketSet, ValidationError,
};
pub use prompts::{DefaultPromptBuilder, PromptBuilder};
