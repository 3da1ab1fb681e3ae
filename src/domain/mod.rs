//! Domain types for the epic refiner.
//!
//! This module contains the core data structures:
//! - Ticket: Immutable issue records and the validated epic/child graph
//! - Outcome: Terminal per-ticket refinement results
//! - Bundle: Aggregated artefacts and the run index

pub mod bundle;
pub mod outcome;
pub mod ticket;

// Re-export commonly used types
pub use bundle::{Artefact, ArtefactBundle, ArtefactKind, FailedTicket, RunIndex};
pub use outcome::{ErrorInfo, ErrorKind, OutcomeStatus, RefinementOutcome};
pub use ticket::{RefinementTask, TaskKind, Ticket, TicketSet, ValidationError};
