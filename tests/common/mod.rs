//! Shared test double: a language model driven by per-ticket scripts.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use epic_refiner::{
    GenerationParams, LanguageModel, ModelError, ModelRequest, Orchestrator, PromptBuilder,
    RefinementClient, RefinementTask, RetryPolicy, Ticket,
};

/// Model double keyed by prompt. Pair it with [`key_prompts`] so the prompt
/// is exactly the ticket key.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ModelError>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    completions: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `key`; the last queued response is not repeated,
    /// unscripted calls succeed with a default body
    pub fn respond(self, key: &str, response: Result<String, ModelError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls().iter().filter(|k| *k == key).count()
    }

    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let key = request.prompt.clone();
        self.calls.lock().unwrap().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(default_response(&key)));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completions.lock().unwrap().push(key);
        response
    }
}

pub fn default_response(key: &str) -> String {
    format!("TITLE: {} refined\nSUMMARY: Refined summary for {}", key, key)
}

/// Prompt builder whose prompt is the bare ticket key
pub fn key_prompts() -> Arc<dyn PromptBuilder> {
    Arc::new(|task: &RefinementTask| task.key().to_string())
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 1000,
    }
}

pub fn orchestrator(
    model: Arc<ScriptedModel>,
    concurrency: usize,
    retry: RetryPolicy,
) -> Orchestrator {
    let client = RefinementClient::new(model, key_prompts(), GenerationParams::default(), retry);
    Orchestrator::new(client, concurrency)
}

pub fn epic(key: &str) -> Ticket {
    Ticket::new(key, format!("{} summary", key), "Epic description").with_issue_type("Epic")
}

pub fn child(key: &str, parent: &str) -> Ticket {
    Ticket::new(key, format!("{} summary", key), "Child description")
        .with_parent(parent)
        .with_issue_type("Story")
}

pub fn children(keys: &[&str], parent: &str) -> Vec<Ticket> {
    keys.iter().map(|k| child(k, parent)).collect()
}
