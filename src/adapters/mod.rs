//! Adapter interfaces for the external language-model capability.
//!
//! The core only sees [`LanguageModel`]: a prompt goes in, text or a
//! classified [`ModelError`] comes out. Wire protocols live behind it.

pub mod cache;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ErrorInfo, ErrorKind};

pub use cache::CachedModel;
pub use openai::OpenAiAdapter;

/// Generation parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: String,

    /// Maximum output length in tokens
    pub max_tokens: u32,

    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1800,
            temperature: 0.0,
        }
    }
}

/// One logical request per refinement task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
        }
    }
}

/// Failure taxonomy of the external capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested wait, if provided
        retry_after: Option<Duration>,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ModelError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::RateLimited { .. } => ErrorKind::RateLimited,
            ModelError::Transient(_) => ErrorKind::Transient,
            ModelError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    /// RateLimited and Transient are worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::Permanent(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<&ModelError> for ErrorInfo {
    fn from(err: &ModelError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// Trait for language-model backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Generate text for a single request
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError>;
}
