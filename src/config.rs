//! Configuration for the epic refiner.
//!
//! Configuration sources (highest priority first):
//! 1. CLI flags (applied by the caller)
//! 2. Environment variables (EPIC_REFINER_MODEL, EPIC_REFINER_CONCURRENCY,
//!    EPIC_REFINER_OUTPUT_DIR)
//! 3. Config file (.epic-refiner/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .epic-refiner/config.yaml
//!
//! The resolved [`RefinerConfig`] is a plain value passed down explicitly;
//! nothing here is cached process-wide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::openai::DEFAULT_BASE_URL;
use crate::adapters::GenerationParams;
use crate::core::RetryPolicy;

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".epic-refiner";

/// File name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Language-model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model identifier
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// API root for an OpenAI-compatible endpoint
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1800,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_seconds: 120,
        }
    }
}

/// Run-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Maximum refinement calls in flight
    pub concurrency: usize,
    /// Base directory for run output folders
    pub output_dir: PathBuf,
    /// Project name given to the prompt builder
    pub project: String,
    /// Description truncation for prompts (0 = off)
    pub truncation_chars: usize,
    /// Response cache directory (None disables caching)
    pub cache_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            output_dir: PathBuf::from("./out/epic_packs"),
            project: String::new(),
            truncation_chars: 0,
            cache_dir: Some(PathBuf::from("./out/.epic_refiner_cache")),
        }
    }
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub run: RunSettings,
}

/// Resolved configuration threaded through the orchestrator and client
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefinerConfig {
    pub model: ModelSettings,
    pub retry: RetryPolicy,
    pub run: RunSettings,
    /// Path to config file (if found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

impl RefinerConfig {
    /// Load from the discovered config file and the process environment
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let config_file = find_config_file(&cwd);
        Self::resolve(config_file, |name| std::env::var(name).ok())
    }

    /// Resolve from an optional config file plus an environment lookup
    pub fn resolve(
        config_file: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = match config_file {
            Some(ref path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let mut config = Self {
            model: file.model,
            retry: file.retry,
            run: file.run,
            config_file,
        };
        config.apply_env_overrides(env)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(model) = env("EPIC_REFINER_MODEL").filter(|v| !v.trim().is_empty()) {
            self.model.name = model;
        }

        if let Some(raw) = env("EPIC_REFINER_CONCURRENCY") {
            self.run.concurrency = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid EPIC_REFINER_CONCURRENCY: {}", raw))?;
        }

        if let Some(dir) = env("EPIC_REFINER_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.run.output_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Concurrency limit, never below one
    pub fn concurrency(&self) -> usize {
        self.run.concurrency.max(1)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.name.clone(),
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_seconds)
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
