// src/error.rs
//! Error taxonomy for the analysis engine.
//!
//! Per-item analysis failures never surface here: the analyzer converts them
//! into fallback records. These types cover the remaining cases — a broken
//! client call (recovered by the analyzer), a misconfigured batch, and a
//! tokenizer backend that cannot be built.

use thiserror::Error;

/// Failure of a single model-service call, after retries.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API key is missing (set OPENAI_API_KEY or configure api_key)")]
    MissingApiKey,

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("response did not match the expected schema: {0}")]
    Schema(String),
}

impl ClientError {
    /// Transport errors and throttling/server statuses are worth another try;
    /// schema violations and auth problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Batch-level failure. Individual item failures are not represented here;
/// they degrade to fallback rows inside the table.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("max_concurrent_tasks must be at least 1")]
    Config,

    #[error("analysis task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("batch was cancelled before every item completed")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("tokenizer backend failed: {0}")]
    Backend(String),
}
