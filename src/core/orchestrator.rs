//! Fan-out/fan-in orchestration of refinement tasks.
//!
//! One task per ticket, at most `concurrency` model conversations in flight,
//! and every task resolves to exactly one outcome. A failing task never
//! cancels its siblings, and the returned outcomes are always in submission
//! order (epic first, then children in input order).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::LanguageModel;
use crate::config::RefinerConfig;
use crate::domain::{
    ErrorInfo, ErrorKind, RefinementOutcome, RefinementTask, Ticket, TicketSet, ValidationError,
};
use crate::prompts::PromptBuilder;

use super::client::RefinementClient;

/// Main refinement orchestrator
pub struct Orchestrator {
    client: Arc<RefinementClient>,
    concurrency: usize,
}

impl Orchestrator {
    /// Create an orchestrator; a concurrency of 0 is treated as 1
    pub fn new(client: RefinementClient, concurrency: usize) -> Self {
        Self {
            client: Arc::new(client),
            concurrency: concurrency.max(1),
        }
    }

    /// Build the client and orchestrator from resolved configuration
    pub fn from_config(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<dyn PromptBuilder>,
        config: &RefinerConfig,
    ) -> Self {
        Self::new(
            RefinementClient::from_config(model, prompts, config),
            config.concurrency(),
        )
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Validate the ticket graph, then refine every ticket.
    ///
    /// Returns `ValidationError` before any model call if the graph is
    /// malformed. Otherwise always returns `1 + children.len()` outcomes.
    pub async fn run(
        &self,
        epic: Ticket,
        children: Vec<Ticket>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RefinementOutcome>, ValidationError> {
        let tickets = TicketSet::new(epic, children)?;
        Ok(self.run_set(&tickets, cancel).await)
    }

    /// Refine an already validated ticket set
    #[instrument(skip_all, fields(epic = %tickets.epic().key, tasks = tickets.len(), concurrency = self.concurrency))]
    pub async fn run_set(
        &self,
        tickets: &TicketSet,
        cancel: &CancellationToken,
    ) -> Vec<RefinementOutcome> {
        let tasks = tickets.tasks();
        let total = tasks.len();
        let started = Instant::now();
        info!("Starting refinement run");

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(usize, RefinementOutcome)> = JoinSet::new();

        for (index, task) in tasks.iter().cloned().enumerate() {
            let gate = gate.clone();
            let client = self.client.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, RefinementOutcome::cancelled(task)),
                };

                // Checked after admission: tasks already running are left to finish
                if cancel.is_cancelled() {
                    debug!(ticket = %task.key(), "Run cancelled, skipping task");
                    return (index, RefinementOutcome::cancelled(task));
                }

                (index, client.refine(task).await)
            });
        }

        // Single accumulation point; slots restore submission order
        let mut slots: Vec<Option<RefinementOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    debug!(
                        ticket = %outcome.key(),
                        status = ?outcome.status,
                        attempts = outcome.attempts,
                        duration_ms = outcome.duration_ms,
                        "Task resolved"
                    );
                    slots[index] = Some(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Refinement worker panicked");
                }
            }
        }

        let outcomes: Vec<RefinementOutcome> = slots
            .into_iter()
            .zip(tasks)
            .map(|(slot, task)| slot.unwrap_or_else(|| panicked(task)))
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            succeeded,
            failed = total - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refinement run finished"
        );

        outcomes
    }
}

fn panicked(task: RefinementTask) -> RefinementOutcome {
    RefinementOutcome::failed(
        task,
        ErrorInfo::new(ErrorKind::Permanent, "refinement worker panicked"),
        0,
    )
}
