//! Command-line interface for the epic refiner.
//!
//! Provides commands for refining an epic pack, validating a ticket file,
//! and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::adapters::openai::API_KEY_ENV;
use crate::adapters::{CachedModel, LanguageModel, OpenAiAdapter};
use crate::config::RefinerConfig;
use crate::core::{aggregate_with_cache_hits, Orchestrator};
use crate::domain::{ArtefactBundle, Ticket, TicketSet};
use crate::prompts::DefaultPromptBuilder;
use crate::writer::write_bundle;

/// epic-refiner - Refine an epic and its child tickets into an epic pack
#[derive(Parser, Debug)]
#[command(name = "epic-refiner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refine every ticket and write the epic pack
    Refine(RefineArgs),

    /// Validate a ticket file without calling the model
    Validate {
        /// JSON file containing an array of tickets
        #[arg(short, long)]
        tickets: PathBuf,

        /// Key of the epic (defaults to the only ticket without a parent)
        #[arg(short, long)]
        epic: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Args, Debug)]
pub struct RefineArgs {
    /// JSON file containing an array of tickets
    #[arg(short, long)]
    pub tickets: PathBuf,

    /// Key of the epic (defaults to the only ticket without a parent)
    #[arg(short, long)]
    pub epic: Option<String>,

    /// Maximum refinement calls in flight
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Base directory for the run folder
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Model identifier
    #[arg(short, long)]
    pub model: Option<String>,

    /// Project name given to the model
    #[arg(short, long)]
    pub project: Option<String>,

    /// File with an example output format to mirror
    #[arg(long)]
    pub example: Option<PathBuf>,

    /// Validate and plan only; no model calls and nothing written
    #[arg(long)]
    pub dry_run: bool,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Refine(args) => refine(args).await,
            Commands::Validate { tickets, epic } => validate(&tickets, epic.as_deref()),
            Commands::Config => show_config(),
        }
    }
}

/// Load tickets from a JSON array
pub fn load_tickets(path: &Path) -> Result<Vec<Ticket>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tickets file: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse tickets file: {}", path.display()))
}

fn load_ticket_set(path: &Path, epic: Option<&str>) -> Result<TicketSet> {
    let tickets = load_tickets(path)?;
    TicketSet::from_tickets(tickets, epic)
        .with_context(|| format!("Invalid ticket graph in {}", path.display()))
}

/// Refine an epic pack end to end
async fn refine(args: RefineArgs) -> Result<()> {
    let mut config = RefinerConfig::load()?;
    if let Some(concurrency) = args.concurrency {
        config.run.concurrency = concurrency;
    }
    if let Some(dir) = args.output_dir {
        config.run.output_dir = dir;
    }
    if let Some(model) = args.model {
        config.model.name = model;
    }
    if let Some(project) = args.project {
        config.run.project = project;
    }
    if args.no_cache {
        config.run.cache_dir = None;
    }

    let tickets = match load_ticket_set(&args.tickets, args.epic.as_deref()) {
        Ok(tickets) => tickets,
        Err(e) => {
            error!(
                file = %args.tickets.display(),
                error = %format!("{:#}", e),
                "Ticket file rejected"
            );
            return Err(e);
        }
    };

    let epic = tickets.epic();
    let epic_title = if epic.summary.trim().is_empty() {
        epic.key.clone()
    } else {
        epic.summary.clone()
    };
    let mut prompts = DefaultPromptBuilder::new(config.run.project.clone(), epic_title)
        .with_truncation(config.run.truncation_chars);
    if let Some(path) = &args.example {
        let example = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read example file: {}", path.display()))?;
        prompts = prompts.with_example(example);
    }

    let adapter = OpenAiAdapter::from_env(config.model.base_url.clone(), config.request_timeout())?;
    if !adapter.is_configured() && !args.dry_run {
        anyhow::bail!(
            "{} environment variable not set. Set it or create a .env file with {}=sk-...",
            API_KEY_ENV,
            API_KEY_ENV
        );
    }

    let adapter = Arc::new(adapter);
    let cache = config
        .run
        .cache_dir
        .as_ref()
        .map(|dir| Arc::new(CachedModel::new(adapter.clone(), dir.clone())));
    let model: Arc<dyn LanguageModel> = match &cache {
        Some(cache) => cache.clone(),
        None => adapter,
    };
    let orchestrator = Orchestrator::from_config(model, Arc::new(prompts), &config);

    let cancel = CancellationToken::new();
    if args.dry_run {
        cancel.cancel();
    }
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; letting in-flight tickets finish and skipping the rest");
                cancel.cancel();
            }
        })
    };

    let outcomes = orchestrator.run_set(&tickets, &cancel).await;
    interrupt.abort();

    let cache_hits = cache.as_ref().map_or(0, |c| c.hits());
    let bundle = aggregate_with_cache_hits(&outcomes, Utc::now(), cache_hits);

    if args.dry_run {
        println!(
            "Dry run: epic {} with {} child tickets is valid; {} refinement calls would be made (concurrency {})",
            tickets.epic().key,
            tickets.children().len(),
            tickets.len(),
            orchestrator.concurrency()
        );
        return Ok(());
    }

    let run_dir = write_bundle(&bundle, &config.run.output_dir).await?;
    print_summary(&bundle, &run_dir);

    Ok(())
}

fn print_summary(bundle: &ArtefactBundle, run_dir: &Path) {
    let index = &bundle.index;
    println!("Run ID: {}", index.run_id);
    println!("Epic: {}", index.epic_key);
    println!(
        "Tickets: {} total, {} succeeded, {} failed ({} from cache)",
        index.total_tickets, index.succeeded, index.failed, index.cache_hits
    );
    println!("Output: {}", run_dir.display());

    if !index.warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &index.warnings {
            eprintln!("  {}", warning);
        }
    }
}

/// Validate a ticket file
fn validate(path: &Path, epic: Option<&str>) -> Result<()> {
    let tickets = load_ticket_set(path, epic)?;

    println!(
        "Epic {} with {} child tickets is valid",
        tickets.epic().key,
        tickets.children().len()
    );
    for task in tickets.tasks() {
        println!("  [{}] {}  {}", task.kind, task.key(), task.ticket.summary);
    }

    Ok(())
}

/// Show the resolved configuration
fn show_config() -> Result<()> {
    let config = RefinerConfig::load()?;

    match &config.config_file {
        Some(path) => println!("# Config file: {}", path.display()),
        None => println!("# Config file: (none found, using defaults)"),
    }
    let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
    print!("{}", yaml);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[test]
    fn test_parse_refine_args() {
        let cli = Cli::parse_from([
            "epic-refiner",
            "refine",
            "--tickets",
            "pack.json",
            "--epic",
            "E-1",
            "--concurrency",
            "2",
            "--dry-run",
        ]);

        match cli.command {
            Commands::Refine(args) => {
                assert_eq!(args.tickets, PathBuf::from("pack.json"));
                assert_eq!(args.epic.as_deref(), Some("E-1"));
                assert_eq!(args.concurrency, Some(2));
                assert!(args.dry_run);
                assert!(!args.no_cache);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_load_ticket_set_rejects_orphans() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tickets.json");
        std::fs::write(
            &path,
            r#"[
                {"key": "E-1", "summary": "Checkout"},
                {"key": "C-1", "summary": "Apple Pay", "parent_key": "E-1"},
                {"key": "C-2", "summary": "Stray", "parent_key": "E-9"}
            ]"#,
        )
        .unwrap();

        let err = load_ticket_set(&path, Some("E-1")).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("references parent 'E-9'"), "{}", message);
    }

    #[test]
    fn test_load_ticket_set_valid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tickets.json");
        std::fs::write(
            &path,
            r#"[
                {"key": "C-1", "summary": "Apple Pay", "parent_key": "E-1", "issue_type": "Story"},
                {"key": "E-1", "summary": "Checkout", "issue_type": "Epic"}
            ]"#,
        )
        .unwrap();

        let set = load_ticket_set(&path, None).unwrap();
        assert_eq!(set.epic().key, "E-1");
        assert_eq!(set.children().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refine_logs_and_rejects_invalid_graph() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tickets.json");
        std::fs::write(
            &path,
            r#"[
                {"key": "E-1", "summary": "Checkout"},
                {"key": "C-1", "summary": "Stray", "parent_key": "E-9"}
            ]"#,
        )
        .unwrap();
        let out_dir = temp.path().join("out");

        let args = RefineArgs {
            tickets: path,
            epic: Some("E-1".to_string()),
            concurrency: None,
            output_dir: Some(out_dir.clone()),
            model: None,
            project: None,
            example: None,
            dry_run: true,
            no_cache: true,
        };
        let err = refine(args).await.unwrap_err();

        assert!(format!("{:#}", err).contains("references parent 'E-9'"));
        assert!(logs_contain("Ticket file rejected"));
        assert!(!out_dir.exists());
    }
}
