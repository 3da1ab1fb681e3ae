//! Core refinement logic.
//!
//! This module contains:
//! - Retry: Exponential backoff policy
//! - Client: Single-task refinement with retries
//! - Orchestrator: Bounded fan-out/fan-in over all tickets
//! - Aggregator: Outcomes to artefact bundle

pub mod aggregator;
pub mod client;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use aggregator::{aggregate, aggregate_with_cache_hits, lint, Annotations};
pub use client::RefinementClient;
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
