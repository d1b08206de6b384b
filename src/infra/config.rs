// src/infra/config.rs — Session configuration (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::infra::errors::RlmError;
use crate::infra::paths;

/// How model-authored code is isolated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Fresh worker process per execution, killed on timeout.
    #[default]
    Process,
    /// Reserved for a narrower allowlist. Selecting it is rejected.
    Strict,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxMode::Process => write!(f, "process"),
            SandboxMode::Strict => write!(f, "strict"),
        }
    }
}

/// Immutable per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RlmConfig {
    pub root_model: String,
    pub sub_model: String,
    pub max_session_budget_usd: f64,
    pub max_tokens_per_session: u64,
    pub max_subcall_depth: u32,
    pub code_timeout_seconds: u64,
    pub session_timeout_seconds: u64,
    pub max_context_chars: usize,
    pub max_print_chars: usize,
    pub sandbox_mode: SandboxMode,
    pub trace_enabled: bool,
    /// Fraction of a ceiling at which a steering warning is raised.
    pub soft_limit_fraction: f64,
    /// Output token cap (and reservation estimate) for root calls.
    pub max_output_tokens: u32,
    /// Output token cap (and reservation estimate) for sub-calls.
    pub sub_max_tokens: u32,
    pub temperature: f32,
    /// Retries for transient provider failures, per call.
    pub max_retries: u32,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            root_model: "claude-sonnet-4-20250514".into(),
            sub_model: "claude-haiku-3-5-20241022".into(),
            max_session_budget_usd: 1.0,
            max_tokens_per_session: 500_000,
            max_subcall_depth: 2,
            code_timeout_seconds: 30,
            session_timeout_seconds: 600,
            max_context_chars: 2_000_000,
            max_print_chars: 10_000,
            sandbox_mode: SandboxMode::Process,
            trace_enabled: false,
            soft_limit_fraction: 0.8,
            max_output_tokens: 4096,
            sub_max_tokens: 1024,
            temperature: 0.0,
            max_retries: 3,
        }
    }
}

impl RlmConfig {
    /// Load config from the default location, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match paths::config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RlmConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject configurations no session can run under.
    pub fn validate(&self) -> Result<(), RlmError> {
        if self.root_model.trim().is_empty() || self.sub_model.trim().is_empty() {
            return Err(RlmError::Config("model identifiers must not be empty".into()));
        }
        if !(self.max_session_budget_usd.is_finite() && self.max_session_budget_usd > 0.0) {
            return Err(RlmError::Config(format!(
                "max_session_budget_usd must be positive, got {}",
                self.max_session_budget_usd
            )));
        }
        if self.max_tokens_per_session == 0 {
            return Err(RlmError::Config("max_tokens_per_session must be positive".into()));
        }
        if self.code_timeout_seconds == 0 {
            return Err(RlmError::Config("code_timeout_seconds must be positive".into()));
        }
        if self.session_timeout_seconds == 0 {
            return Err(RlmError::Config("session_timeout_seconds must be positive".into()));
        }
        if self.max_context_chars == 0 || self.max_print_chars == 0 {
            return Err(RlmError::Config(
                "max_context_chars and max_print_chars must be positive".into(),
            ));
        }
        if !(self.soft_limit_fraction > 0.0 && self.soft_limit_fraction <= 1.0) {
            return Err(RlmError::Config(format!(
                "soft_limit_fraction must be in (0, 1], got {}",
                self.soft_limit_fraction
            )));
        }
        if self.sandbox_mode == SandboxMode::Strict {
            return Err(RlmError::NotImplemented(
                "sandbox_mode = \"strict\" is reserved; use \"process\"".into(),
            ));
        }
        Ok(())
    }

    pub fn code_timeout(&self) -> Duration {
        Duration::from_secs(self.code_timeout_seconds)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }
}
