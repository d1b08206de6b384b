// src/core/types.rs — Core domain types

use serde::{Deserialize, Serialize};

use super::ledger::BudgetSummary;
use super::trace::TraceEvent;

/// Outcome of one sandbox execution. Produced once per `Sandbox::execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub final_answer: Option<String>,
    pub execution_time_ms: u64,
    /// The worker was killed at the execution timeout.
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionResult {
    /// A failed execution that never reached the worker (or whose worker was lost).
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn has_final_answer(&self) -> bool {
        self.final_answer.is_some()
    }
}

/// Session lifecycle. The last five variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    ContextLoaded,
    Running,
    FinalAnswerReached,
    BudgetExhausted,
    TimedOut,
    MaxTurnsReached,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::FinalAnswerReached
                | SessionState::BudgetExhausted
                | SessionState::TimedOut
                | SessionState::MaxTurnsReached
                | SessionState::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::ContextLoaded => "context_loaded",
            SessionState::Running => "running",
            SessionState::FinalAnswerReached => "final_answer_reached",
            SessionState::BudgetExhausted => "budget_exhausted",
            SessionState::TimedOut => "timed_out",
            SessionState::MaxTurnsReached => "max_turns_reached",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Terminal result of `Session::run`. Produced exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub success: bool,
    pub answer: Option<String>,
    pub session_id: String,
    pub error: Option<String>,
    pub state: SessionState,
    pub turns: u32,
    pub budget: BudgetSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Text,
    Code,
}

/// What `load_context` / `load_code_context` learned about the loaded input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub kind: ContextKind,
    pub chars: usize,
    pub lines: usize,
    pub est_tokens: u32,
    pub language: Option<String>,
    pub symbol_count: Option<usize>,
}

impl ContextMetadata {
    /// One-line description used in the system prompt.
    pub fn describe(&self) -> String {
        match self.kind {
            ContextKind::Text => format!(
                "text, {} chars, {} lines, ~{} tokens",
                self.chars, self.lines, self.est_tokens
            ),
            ContextKind::Code => format!(
                "{} source, {} chars, {} lines, {} symbols, ~{} tokens",
                self.language.as_deref().unwrap_or("unknown"),
                self.chars,
                self.lines,
                self.symbol_count.unwrap_or(0),
                self.est_tokens
            ),
        }
    }
}
