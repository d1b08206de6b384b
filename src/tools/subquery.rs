// src/tools/subquery.rs — `llm_query`: recursive sub-model calls from sandboxed code
//
// Every failure mode (budget, depth, provider) degrades to a returned string.
// Nothing here may fail the session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{arg_str, Tool, ToolSpec};
use crate::core::cost::estimate_tokens;
use crate::core::ledger::{lock_ledger, CallKind, SharedLedger, SubcallGuard};
use crate::core::trace::{TraceKind, TraceLog};
use crate::provider::{ChatRequest, Message, ModelProvider};

pub struct LlmQueryTool {
    provider: Arc<dyn ModelProvider>,
    ledger: SharedLedger,
    trace: TraceLog,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmQueryTool {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        ledger: SharedLedger,
        trace: TraceLog,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            ledger,
            trace,
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Reserve, enter depth, call, record. Returns the answer or a diagnostic.
    pub async fn query(&self, prompt: &str) -> String {
        let prompt_chars = prompt.chars().count();
        let est_input = estimate_tokens(prompt);

        let reserved = lock_ledger(&self.ledger).check_and_reserve(
            &self.model,
            est_input,
            self.max_tokens,
            CallKind::Sub,
        );
        if let Err(e) = reserved {
            tracing::warn!(error = %e, "llm_query rejected by budget");
            self.record_trace(prompt_chars, 0.0, false);
            return format!("[llm_query failed] Budget exceeded: {}", e);
        }

        let guard = match SubcallGuard::enter(&self.ledger) {
            Ok(g) => g,
            Err(e) => {
                lock_ledger(&self.ledger).cancel_reservation(CallKind::Sub);
                tracing::warn!(error = %e, "llm_query rejected by depth limit");
                self.record_trace(prompt_chars, 0.0, false);
                return format!("[llm_query failed] {}", e);
            }
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system: None,
        };

        let result = self.provider.chat(request).await;
        let answer = match result {
            Ok(response) => {
                let cost = lock_ledger(&self.ledger).record_usage(
                    &self.model,
                    &response.usage,
                    CallKind::Sub,
                );
                tracing::debug!(cost, prompt_chars, "llm_query completed");
                self.record_trace(prompt_chars, cost, true);
                response.content
            }
            Err(e) => {
                lock_ledger(&self.ledger).cancel_reservation(CallKind::Sub);
                tracing::warn!(error = %e, "llm_query provider call failed");
                self.record_trace(prompt_chars, 0.0, false);
                format!("[llm_query failed] {}", e)
            }
        };
        drop(guard);
        answer
    }

    fn record_trace(&self, prompt_chars: usize, cost_usd: f64, ok: bool) {
        let depth = lock_ledger(&self.ledger).current_depth();
        self.trace.record(TraceKind::SubCall {
            prompt_chars,
            depth,
            cost_usd,
            ok,
        });
    }
}

#[async_trait]
impl Tool for LlmQueryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "llm_query".into(),
            signature: "llm_query(prompt)".into(),
            example: r#"llm_query("Summarize this paragraph: ...")"#.into(),
            description: "Ask a smaller model a self-contained question. Put everything it \
                          needs into the prompt; it cannot see the context. Budget-limited."
                .into(),
            returns: "string (starts with \"[llm_query failed]\" on failure)".into(),
        }
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let prompt = arg_str(args, 0, "prompt")?;
        Ok(Value::String(self.query(prompt).await))
    }
}
