// src/infra/errors.rs — Error types for the RLM runtime

use thiserror::Error;

use crate::core::ledger::BudgetError;

#[derive(Error, Debug)]
pub enum RlmError {
    // Provider errors (retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Budget errors (not retriable)
    #[error(transparent)]
    Budget(#[from] BudgetError),

    // Context errors
    #[error("Context too large: {chars} chars exceeds the {max} char limit")]
    ContextTooLarge { chars: usize, max: usize },

    #[error("No context loaded. Call load_context or load_code_context before run.")]
    NoContext,

    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Value for '{name}' cannot cross the sandbox boundary: {reason}")]
    NotTransferable { name: String, reason: String },

    // Programmer errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // Infra
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RlmError::Provider {
                retriable: true,
                ..
            } | RlmError::RateLimited { .. }
        )
    }
}
