//! End-to-End Pipeline Tests
//!
//! Ticket file to written epic pack, with the response cache in front of
//! the model.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use epic_refiner::adapters::CachedModel;
use epic_refiner::domain::ArtefactKind;
use epic_refiner::writer::{write_bundle, INDEX_JSON};
use epic_refiner::{
    aggregate, aggregate_with_cache_hits, GenerationParams, ModelError, Orchestrator,
    RefinementClient, RunIndex, Ticket, TicketSet,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{fast_retry, key_prompts, ScriptedModel};

const TICKETS: &str = r#"[
    {"key": "PAY-2", "summary": "Apple Pay", "description": "Wallet on iOS", "parent_key": "PAY-1", "issue_type": "Story"},
    {"key": "PAY-1", "summary": "Payments overhaul", "description": "Unify checkout", "issue_type": "Epic", "labels": ["payments"]},
    {"key": "PAY-3", "summary": "Refund flow", "parent_key": "PAY-1", "issue_type": "Story"}
]"#;

fn ticket_set() -> TicketSet {
    let tickets: Vec<Ticket> = serde_json::from_str(TICKETS).unwrap();
    TicketSet::from_tickets(tickets, None).unwrap()
}

fn cached_orchestrator(
    inner: Arc<ScriptedModel>,
    cache_dir: &std::path::Path,
) -> (Orchestrator, Arc<CachedModel>) {
    let cache = Arc::new(CachedModel::new(inner, cache_dir));
    let client = RefinementClient::new(
        cache.clone(),
        key_prompts(),
        GenerationParams::default(),
        fast_retry(1),
    );
    (Orchestrator::new(client, 2), cache)
}

#[tokio::test]
async fn test_refine_and_write_epic_pack() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    let out_dir = temp.path().join("out");

    let tickets = ticket_set();
    assert_eq!(tickets.epic().key, "PAY-1");
    assert_eq!(tickets.epic().labels.as_deref(), Some("payments"));

    let model = Arc::new(
        ScriptedModel::new()
            .respond("PAY-1", Ok("TITLE: Unified checkout\nSUMMARY: One flow for all markets".into()))
            .respond("PAY-3", Err(ModelError::Permanent("refused".into()))),
    );

    let (orchestrator, _cache) = cached_orchestrator(model.clone(), &cache_dir);
    let outcomes = orchestrator.run_set(&tickets, &CancellationToken::new()).await;
    let keys: Vec<&str> = outcomes.iter().map(|o| o.key()).collect();
    assert_eq!(keys, vec!["PAY-1", "PAY-2", "PAY-3"]);

    let bundle = aggregate(&outcomes, Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap());
    let run_dir = write_bundle(&bundle, &out_dir).await.unwrap();

    assert_eq!(run_dir, out_dir.join("PAY-1_20240901_080000"));

    let epic = std::fs::read_to_string(run_dir.join("epic.md")).unwrap();
    assert!(epic.starts_with("# Unified checkout\n"));

    let csv = std::fs::read_to_string(run_dir.join("refined_tickets.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("PAY-1,Unified checkout,One flow for all markets"));
    assert!(!csv.contains("PAY-3"));

    let index: RunIndex =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join(INDEX_JSON)).unwrap()).unwrap();
    assert_eq!(index.total_tickets, 3);
    assert_eq!(index.succeeded, 2);
    assert_eq!(index.failed, 1);
    assert_eq!(index.warnings, vec!["PAY-3: Permanent after 1 attempts"]);
}

#[tokio::test]
async fn test_rerun_served_from_cache() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    let tickets = ticket_set();

    let first_model = Arc::new(
        ScriptedModel::new().respond("PAY-3", Err(ModelError::Transient("timeout".into()))),
    );
    let (orchestrator, first_cache) = cached_orchestrator(first_model.clone(), &cache_dir);
    let first = orchestrator.run_set(&tickets, &CancellationToken::new()).await;
    assert_eq!(first_model.calls().len(), 3);
    assert_eq!(first_cache.hits(), 0);
    assert!(!first[2].is_success());

    // Successes are replayed; the earlier failure is asked again
    let second_model = Arc::new(ScriptedModel::new());
    let (orchestrator, second_cache) = cached_orchestrator(second_model.clone(), &cache_dir);
    let second = orchestrator.run_set(&tickets, &CancellationToken::new()).await;

    assert_eq!(second_model.calls(), vec!["PAY-3"]);
    assert_eq!(second_cache.hits(), 2);
    assert!(second.iter().all(|o| o.is_success()));
    assert_eq!(first[0].content, second[0].content);
    assert_eq!(first[1].content, second[1].content);

    let bundle = aggregate_with_cache_hits(
        &second,
        Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap(),
        second_cache.hits(),
    );
    assert_eq!(bundle.index.cache_hits, 2);
    let summary = &bundle.get(ArtefactKind::Index).unwrap().content;
    assert!(summary.contains("- **Cache hits:** 2"));
}
