use std::time::Duration;

use thiserror::Error;

/// Failure of a single backend call. Never escapes the engine: every variant
/// sends the string on to the next backend in the chain.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("timed out after {:.1}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    pub fn failed(message: impl Into<String>) -> Self {
        BackendError::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(Duration::ZERO)
        } else {
            BackendError::Failed(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to persist batch {number} for '{lang}': {reason}")]
    BatchWrite {
        lang: String,
        number: u32,
        reason: String,
    },
    #[error("checkpoint for '{lang}' is unusable: {reason}")]
    StateCorruption { lang: String, reason: String },
    #[error("merged artifact for '{lang}' failed validation: {reason}")]
    MergeValidation { lang: String, reason: String },
    #[error("failed to write artifact {path}: {reason}")]
    ArtifactWrite { path: String, reason: String },
}

impl PipelineError {
    pub(crate) fn batch_write(lang: &str, number: u32, reason: impl ToString) -> Self {
        PipelineError::BatchWrite {
            lang: lang.to_string(),
            number,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn merge_validation(lang: &str, reason: impl ToString) -> Self {
        PipelineError::MergeValidation {
            lang: lang.to_string(),
            reason: reason.to_string(),
        }
    }
}
