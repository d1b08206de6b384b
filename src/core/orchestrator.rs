// src/core/orchestrator.rs — Session state machine and turn loop

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::cost::estimate_tokens;
use super::extract::extract_code_blocks;
use super::ledger::{lock_ledger, BudgetLedger, CallKind, SharedLedger, SoftLimitWarning};
use super::system_prompt::{render_system_prompt, PromptInputs, NO_CODE_STEERING};
use super::trace::{TraceKind, TraceLog};
use super::truncation::truncate_output;
use super::types::*;
use crate::infra::config::RlmConfig;
use crate::infra::errors::RlmError;
use crate::navigation::{NavigationService, SourceIndex};
use crate::provider::{ChatRequest, Message, ModelProvider, Role};
use crate::sandbox::Sandbox;
use crate::tools::context_tools::{context_tools, TextContext};
use crate::tools::interceptor::{self, misuse_feedback, ScanOutcome, ToolMisuse};
use crate::tools::navigation::navigation_tools;
use crate::tools::subquery::LlmQueryTool;

/// Sandbox variable holding the loaded text.
pub const CONTEXT_VAR: &str = "context";

type WarningQueue = Arc<Mutex<Vec<SoftLimitWarning>>>;

/// What happened to one code block. Every branch is handled by the turn loop.
#[derive(Debug)]
enum BlockOutcome {
    Executed(ExecutionResult),
    TimedOut(ExecutionResult),
    Rejected(Vec<ToolMisuse>),
}

/// How the turn loop ended.
struct Termination {
    state: SessionState,
    answer: Option<String>,
    error: Option<String>,
    turns: u32,
}

impl Termination {
    fn new(state: SessionState, turns: u32) -> Self {
        Self {
            state,
            answer: None,
            error: None,
            turns,
        }
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// One exploration session: one ledger, one sandbox, one context.
pub struct Session {
    id: String,
    config: RlmConfig,
    provider: Arc<dyn ModelProvider>,
    ledger: SharedLedger,
    warnings: WarningQueue,
    sandbox: Sandbox,
    trace: TraceLog,
    navigator: Option<Arc<dyn NavigationService>>,
    metadata: Option<ContextMetadata>,
    state: SessionState,
}

impl Session {
    /// Validate `config` and build a session. Configuration errors surface here,
    /// before anything runs.
    pub fn new(config: RlmConfig, provider: Arc<dyn ModelProvider>) -> Result<Self, RlmError> {
        config.validate()?;
        let sandbox = Sandbox::new(&config)?;
        Ok(Self::assemble(config, provider, sandbox))
    }

    fn assemble(config: RlmConfig, provider: Arc<dyn ModelProvider>, sandbox: Sandbox) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let warnings: WarningQueue = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&warnings);
        let ledger = BudgetLedger::from_config(&config)
            .with_soft_limit_callback(move |w| {
                if let Ok(mut q) = queue.lock() {
                    q.push(w);
                }
            })
            .into_shared();

        Self {
            trace: TraceLog::new(id.clone()),
            id,
            config,
            provider,
            ledger,
            warnings,
            sandbox,
            navigator: None,
            metadata: None,
            state: SessionState::Created,
        }
    }

    /// Launch workers from `program` instead of the current executable.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.sandbox = Sandbox::with_program(&self.config, program);
        self
    }

    /// Use `navigator` for code contexts instead of the built-in `SourceIndex`.
    pub fn with_navigator(mut self, navigator: Arc<dyn NavigationService>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Load plain text and register the generic context tools.
    pub fn load_context(&mut self, text: &str) -> Result<ContextMetadata, RlmError> {
        self.prepare_load(text)?;
        let ctx = TextContext::new(text);
        for tool in context_tools(&ctx) {
            self.sandbox.register_callback(tool);
        }
        let metadata = ContextMetadata {
            kind: ContextKind::Text,
            chars: text.chars().count(),
            lines: text.lines().count(),
            est_tokens: estimate_tokens(text),
            language: None,
            symbol_count: None,
        };
        self.finish_load(text, metadata)
    }

    /// Load source code, index it, and register the navigation tools.
    pub fn load_code_context(
        &mut self,
        source: &str,
        language: Option<&str>,
    ) -> Result<ContextMetadata, RlmError> {
        self.prepare_load(source)?;
        let navigator: Arc<dyn NavigationService> = match &self.navigator {
            Some(nav) => Arc::clone(nav),
            None => Arc::new(SourceIndex::build(source, language)),
        };
        for tool in navigation_tools(&navigator) {
            self.sandbox.register_callback(tool);
        }
        let summary = navigator.summary();
        let metadata = ContextMetadata {
            kind: ContextKind::Code,
            chars: source.chars().count(),
            lines: source.lines().count(),
            est_tokens: estimate_tokens(source),
            language: Some(summary.language),
            symbol_count: Some(summary.symbol_count),
        };
        self.finish_load(source, metadata)
    }

    fn prepare_load(&mut self, content: &str) -> Result<(), RlmError> {
        if !matches!(self.state, SessionState::Created | SessionState::ContextLoaded) {
            return Err(RlmError::Sandbox(format!(
                "cannot load context into a session in state {}",
                self.state
            )));
        }
        let chars = content.chars().count();
        if chars > self.config.max_context_chars {
            return Err(RlmError::ContextTooLarge {
                chars,
                max: self.config.max_context_chars,
            });
        }
        // Reloading replaces the previous tool set and bindings.
        self.sandbox.stop();
        self.sandbox.start()
    }

    fn finish_load(
        &mut self,
        content: &str,
        metadata: ContextMetadata,
    ) -> Result<ContextMetadata, RlmError> {
        let llm_query = LlmQueryTool::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.ledger),
            self.trace.clone(),
            self.config.sub_model.clone(),
            self.config.sub_max_tokens,
            self.config.temperature,
        );
        self.sandbox.register_callback(Arc::new(llm_query));
        self.sandbox.inject_variable(CONTEXT_VAR, content)?;

        tracing::info!(
            session_id = %self.id,
            context = %metadata.describe(),
            tools = self.sandbox.tools().len(),
            "Context loaded"
        );
        self.metadata = Some(metadata.clone());
        self.state = SessionState::ContextLoaded;
        Ok(metadata)
    }

    /// Drive the turn loop to a terminal state. Never returns an error: every
    /// expected failure mode is reported in the result.
    pub async fn run(&mut self, task: &str, max_turns: u32) -> SessionResult {
        let metadata = match (self.state, self.metadata.clone()) {
            (SessionState::ContextLoaded, Some(meta)) => meta,
            (SessionState::Created, _) => {
                return self.result(
                    Termination::new(SessionState::Failed, 0).with_error(RlmError::NoContext),
                );
            }
            (state, _) if state.is_terminal() => {
                return self.result(
                    Termination::new(SessionState::Failed, 0)
                        .with_error(format!("Session has already run (state: {})", state)),
                );
            }
            (state, _) => {
                return self.result(
                    Termination::new(SessionState::Failed, 0)
                        .with_error(format!("Session cannot run in state {}", state)),
                );
            }
        };

        self.state = SessionState::Running;
        tracing::info!(session_id = %self.id, max_turns, "Session started");

        let outcome = self.turn_loop(task, max_turns, &metadata).await;

        self.sandbox.stop();
        lock_ledger(&self.ledger).tick();
        self.state = outcome.state;

        let summary = lock_ledger(&self.ledger).get_summary();
        tracing::info!(
            session_id = %self.id,
            state = %outcome.state,
            turns = outcome.turns,
            budget = %summary,
            "Session finished"
        );
        self.result(outcome)
    }

    async fn turn_loop(
        &mut self,
        task: &str,
        max_turns: u32,
        metadata: &ContextMetadata,
    ) -> Termination {
        let started = Instant::now();
        let session_timeout = self.config.session_timeout();
        let mut messages = vec![Message::user(format!("Task: {}", task))];

        for turn in 1..=max_turns {
            let done = turn - 1;
            if started.elapsed() >= session_timeout {
                return Termination::new(SessionState::TimedOut, done).with_error(format!(
                    "Session timed out after {}s",
                    session_timeout.as_secs()
                ));
            }

            self.flush_soft_limit_warnings(&mut messages);

            let system = match self.render_prompt(metadata) {
                Ok(s) => s,
                Err(e) => return Termination::new(SessionState::Failed, done).with_error(e),
            };

            let est_input = estimate_tokens(&system)
                + messages
                    .iter()
                    .map(|m| estimate_tokens(&m.content))
                    .sum::<u32>();
            let reserved = lock_ledger(&self.ledger).check_and_reserve(
                &self.config.root_model,
                est_input,
                self.config.max_output_tokens,
                CallKind::Root,
            );
            if let Err(e) = reserved {
                tracing::warn!(
                    session_id = %self.id,
                    turn,
                    error = %e,
                    "Root call rejected by budget"
                );
                return Termination::new(SessionState::BudgetExhausted, done).with_error(e);
            }

            let request = ChatRequest {
                model: self.config.root_model.clone(),
                messages: messages.clone(),
                max_tokens: Some(self.config.max_output_tokens),
                temperature: Some(self.config.temperature),
                system: Some(system),
            };
            let response = match self.provider.chat(request).await {
                Ok(r) => r,
                Err(e) => {
                    lock_ledger(&self.ledger).cancel_reservation(CallKind::Root);
                    tracing::warn!(session_id = %self.id, turn, error = %e, "Root call failed");
                    return Termination::new(SessionState::Failed, done)
                        .with_error(format!("Root call failed: {}", e));
                }
            };
            let cost = lock_ledger(&self.ledger).record_usage(
                &self.config.root_model,
                &response.usage,
                CallKind::Root,
            );

            let blocks = extract_code_blocks(&response.content);
            self.trace.record(TraceKind::RootResponse {
                turn,
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                cost_usd: cost,
                code_blocks: blocks.len(),
            });
            tracing::debug!(turn, cost, blocks = blocks.len(), "Root response");
            messages.push(Message::assistant(response.content));

            if blocks.is_empty() {
                messages.push(Message::user(NO_CODE_STEERING));
                continue;
            }

            let mut feedback = Vec::with_capacity(blocks.len());
            for (i, code) in blocks.iter().enumerate() {
                let index = i + 1;
                let outcome = match self.run_block(turn, index, code).await {
                    Ok(o) => o,
                    Err(e) => {
                        return Termination::new(SessionState::Failed, turn).with_error(e);
                    }
                };
                if let BlockOutcome::Executed(result) = &outcome {
                    if result.has_final_answer() {
                        let mut t = Termination::new(SessionState::FinalAnswerReached, turn);
                        t.answer = result.final_answer.clone();
                        return t;
                    }
                }
                feedback.push(self.render_feedback(index, &outcome));
            }
            messages.push(Message::user(feedback.join("\n")));
        }

        Termination::new(SessionState::MaxTurnsReached, max_turns)
    }

    /// Interceptor, then sandbox. `Err` only for sandbox infrastructure faults.
    async fn run_block(
        &mut self,
        turn: u32,
        block: usize,
        code: &str,
    ) -> Result<BlockOutcome, RlmError> {
        let (code, calls) = match interceptor::scan(code, self.sandbox.tools()) {
            ScanOutcome::Ready { code, calls } => (code, calls),
            ScanOutcome::Misuse(misuses) => {
                tracing::debug!(turn, block, count = misuses.len(), "Tool misuse rejected");
                self.trace.record(TraceKind::CodeExec {
                    turn,
                    block,
                    success: false,
                    execution_time_ms: 0,
                    error: Some(format!("{} tool call(s) rejected", misuses.len())),
                });
                return Ok(BlockOutcome::Rejected(misuses));
            }
        };

        let tools = self.sandbox.tools().clone();
        let slots = interceptor::execute_calls(&calls, &tools, &self.trace).await;

        let result = self
            .sandbox
            .execute_with(&code, &slots, self.config.code_timeout())
            .await?;
        self.record_exec(turn, block, &result);

        if result.timed_out {
            Ok(BlockOutcome::TimedOut(result))
        } else {
            Ok(BlockOutcome::Executed(result))
        }
    }

    fn record_exec(&self, turn: u32, block: usize, result: &ExecutionResult) {
        self.trace.record(TraceKind::CodeExec {
            turn,
            block,
            success: result.success,
            execution_time_ms: result.execution_time_ms,
            error: result.error.clone(),
        });
    }

    fn render_prompt(&self, metadata: &ContextMetadata) -> Result<String, RlmError> {
        let (limits, status) = {
            let ledger = lock_ledger(&self.ledger);
            (ledger.limits().clone(), ledger.get_summary().to_string())
        };
        let inputs = PromptInputs {
            context: metadata,
            max_budget_usd: limits.max_usd,
            max_depth: limits.max_depth,
            code_timeout_secs: self.config.code_timeout_seconds,
            max_print_chars: self.config.max_print_chars,
            budget_status: status,
        };
        render_system_prompt(&inputs, &self.sandbox.tools().specs())
    }

    /// Deliver queued soft-limit warnings at this turn boundary.
    fn flush_soft_limit_warnings(&self, messages: &mut Vec<Message>) {
        let pending: Vec<SoftLimitWarning> = match self.warnings.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        if pending.is_empty() {
            return;
        }

        let text = pending
            .iter()
            .map(|w| {
                let message = w.message();
                self.trace.record(TraceKind::SoftLimit {
                    message: message.clone(),
                });
                message
            })
            .collect::<Vec<_>>()
            .join("\n");

        // Keep roles alternating: fold into the pending user message if there is one.
        match messages.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push_str("\n\n");
                last.content.push_str(&text);
            }
            _ => messages.push(Message::user(text)),
        }
    }

    fn render_feedback(&self, index: usize, outcome: &BlockOutcome) -> String {
        let max = self.config.max_print_chars;
        match outcome {
            BlockOutcome::Rejected(misuses) => {
                format!("## Block {} (rejected)\n{}", index, misuse_feedback(misuses))
            }
            BlockOutcome::TimedOut(result) => format!(
                "## Block {} (timed out)\n{}\nNo variable from this block was kept, \
                 including tool-call results. Do less work per block.\n",
                index,
                result.error.as_deref().unwrap_or("Execution timed out")
            ),
            BlockOutcome::Executed(result) => {
                let status = if result.success { "ok" } else { "error" };
                let mut text = format!(
                    "## Block {} ({}, {} ms)\n",
                    index, status, result.execution_time_ms
                );
                push_section(&mut text, "stdout", &result.stdout, max);
                push_section(&mut text, "stderr", &result.stderr, max);
                if let Some(err) = &result.error {
                    push_section(&mut text, "error", err, max);
                }
                if result.success && result.stdout.is_empty() && result.stderr.is_empty() {
                    text.push_str("(no output)\n");
                }
                text
            }
        }
    }

    fn result(&self, outcome: Termination) -> SessionResult {
        let budget = lock_ledger(&self.ledger).get_summary();
        let trace = self.config.trace_enabled.then(|| self.trace.snapshot());
        SessionResult {
            success: outcome.state == SessionState::FinalAnswerReached,
            answer: outcome.answer,
            session_id: self.id.clone(),
            error: outcome.error,
            state: outcome.state,
            turns: outcome.turns,
            budget,
            trace,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.sandbox.stop();
    }
}

fn push_section(text: &mut String, label: &str, body: &str, max_chars: usize) {
    if body.is_empty() {
        return;
    }
    let truncated = truncate_output(body, max_chars);
    text.push_str(label);
    text.push_str(":\n");
    text.push_str(&truncated.content);
    if !truncated.content.ends_with('\n') {
        text.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::SoftLimitDimension;
    use crate::provider::{ChatResponse, TokenUsage};
    use async_trait::async_trait;

    /// Answers every call with the same text, counting calls.
    struct FixedProvider {
        reply: String,
        calls: std::sync::atomic::AtomicU32,
    }

    impl FixedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: std::sync::atomic::AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for FixedProvider {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, RlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ChatResponse {
                content: self.reply.clone(),
                usage: TokenUsage::new(100, 20),
                ..Default::default()
            })
        }
    }

    fn session(config: RlmConfig, provider: Arc<FixedProvider>) -> Session {
        // These tests never reach a worker, so any path will do.
        Session::new(config, provider)
            .unwrap()
            .with_worker_program("/nonexistent/koi-rlm")
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let cfg = RlmConfig {
            max_session_budget_usd: 0.0,
            ..Default::default()
        };
        assert!(Session::new(cfg, FixedProvider::new("")).is_err());
    }

    #[test]
    fn test_load_context_registers_text_tools() {
        let mut s = session(RlmConfig::default(), FixedProvider::new(""));
        let meta = s.load_context("def f(): pass").unwrap();
        assert_eq!(meta.kind, ContextKind::Text);
        assert_eq!(meta.chars, 13);
        assert_eq!(s.state(), SessionState::ContextLoaded);
        let names = s.sandbox().tools().names();
        assert_eq!(names, vec!["peek", "grep", "lines", "llm_query"]);
        assert_eq!(
            s.sandbox().get_variable(CONTEXT_VAR),
            Some(&serde_json::json!("def f(): pass"))
        );
    }

    #[test]
    fn test_load_code_context_registers_navigation_tools() {
        let mut s = session(RlmConfig::default(), FixedProvider::new(""));
        let meta = s
            .load_code_context("fn main() {\n    println!(\"hi\");\n}\n", Some("rust"))
            .unwrap();
        assert_eq!(meta.kind, ContextKind::Code);
        assert_eq!(meta.language.as_deref(), Some("rust"));
        assert_eq!(meta.symbol_count, Some(1));
        let tools = s.sandbox().tools();
        for name in ["outline", "list_symbols", "read_symbol", "search_code", "code_summary"] {
            assert!(tools.contains(name), "missing {}", name);
        }
        assert!(!tools.contains("peek"));
    }

    #[test]
    fn test_context_too_large() {
        let cfg = RlmConfig {
            max_context_chars: 10,
            ..Default::default()
        };
        let mut s = session(cfg, FixedProvider::new(""));
        let err = s.load_context("this is more than ten chars").unwrap_err();
        assert!(matches!(err, RlmError::ContextTooLarge { max: 10, .. }));
        assert_eq!(s.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn test_run_without_context_fails() {
        let provider = FixedProvider::new("hello");
        let mut s = session(RlmConfig::default(), provider.clone());
        let result = s.run("anything", 3).await;
        assert!(!result.success);
        assert_eq!(result.state, SessionState::Failed);
        assert!(result.error.unwrap().contains("No context"));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_code_until_max_turns() {
        let provider = FixedProvider::new("I think it is a function.");
        let mut s = session(RlmConfig::default(), provider.clone());
        s.load_context("def f(): pass").unwrap();

        let result = s.run("what is f?", 3).await;
        assert!(!result.success);
        assert_eq!(result.state, SessionState::MaxTurnsReached);
        assert!(result.error.is_none());
        assert!(result.answer.is_none());
        assert_eq!(result.budget.root_calls, 3);
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(!s.sandbox().is_running());
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let mut s = session(RlmConfig::default(), FixedProvider::new("no code"));
        s.load_context("x").unwrap();
        s.run("t", 1).await;
        let again = s.run("t", 1).await;
        assert_eq!(again.state, SessionState::Failed);
        assert!(again.error.unwrap().contains("already run"));
    }

    #[tokio::test]
    async fn test_tiny_budget_never_calls_provider() {
        let provider = FixedProvider::new("no code");
        let cfg = RlmConfig {
            max_session_budget_usd: 0.000_01,
            ..Default::default()
        };
        let mut s = session(cfg, provider.clone());
        s.load_context("def f(): pass").unwrap();

        let result = s.run("what is f?", 3).await;
        assert_eq!(result.state, SessionState::BudgetExhausted);
        assert!(result.error.is_some());
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(result.budget.total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_misuse_spawns_nothing() {
        let provider = FixedProvider::new("```rhai\npeek(0, 5);\n```");
        let cfg = RlmConfig {
            trace_enabled: true,
            ..Default::default()
        };
        let mut s = session(cfg, provider);
        s.load_context("hello world").unwrap();

        let result = s.run("look", 2).await;
        assert_eq!(result.state, SessionState::MaxTurnsReached);
        assert_eq!(s.sandbox().spawn_count(), 0);
        let trace = result.trace.unwrap();
        assert!(trace.iter().any(|e| matches!(
            e.kind,
            TraceKind::CodeExec { success: false, .. }
        )));
    }

    #[test]
    fn test_feedback_sections_truncated() {
        let cfg = RlmConfig {
            max_print_chars: 10,
            ..Default::default()
        };
        let s = session(cfg, FixedProvider::new(""));
        let outcome = BlockOutcome::Executed(ExecutionResult {
            success: false,
            stdout: "x".repeat(50),
            error: Some("Runtime error: boom".into()),
            ..Default::default()
        });
        let text = s.render_feedback(1, &outcome);
        assert!(text.starts_with("## Block 1 (error"));
        assert!(text.contains("[Output truncated"));
        assert!(text.contains("error:\n"));
    }

    #[test]
    fn test_soft_limit_warning_folds_into_user_message() {
        let s = session(RlmConfig::default(), FixedProvider::new(""));
        s.warnings.lock().unwrap().push(SoftLimitWarning {
            dimension: SoftLimitDimension::Cost,
            used: 0.85,
            limit: 1.0,
            fraction: 0.8,
        });
        let mut messages = vec![Message::user("feedback")];
        s.flush_soft_limit_warnings(&mut messages);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("[BUDGET WARNING]"));
        assert_eq!(s.trace.len(), 1);

        // Queue is drained.
        s.flush_soft_limit_warnings(&mut messages);
        assert_eq!(s.trace.len(), 1);
    }
}
