// src/core/trace.rs — Session event trace
//
// Append-only and ordered. The turn loop and the sub-query tool both append,
// but never concurrently (one code block runs at a time).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceKind {
    RootResponse {
        turn: u32,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        code_blocks: usize,
    },
    SubCall {
        prompt_chars: usize,
        depth: u32,
        cost_usd: f64,
        ok: bool,
    },
    CodeExec {
        turn: u32,
        block: usize,
        success: bool,
        execution_time_ms: u64,
        error: Option<String>,
    },
    ToolIntercepted {
        tool: String,
        variable: String,
        ok: bool,
    },
    SoftLimit {
        message: String,
    },
}

impl TraceKind {
    pub fn name(&self) -> &'static str {
        match self {
            TraceKind::RootResponse { .. } => "root_response",
            TraceKind::SubCall { .. } => "sub_call",
            TraceKind::CodeExec { .. } => "code_exec",
            TraceKind::ToolIntercepted { .. } => "tool_intercepted",
            TraceKind::SoftLimit { .. } => "soft_limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceKind,
}

/// Cloneable handle to one session's trace.
#[derive(Debug, Clone)]
pub struct TraceLog {
    session_id: String,
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl TraceLog {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self, kind: TraceKind) {
        tracing::trace!(event = kind.name(), session = %self.session_id, "trace");
        let event = TraceEvent {
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            kind,
        };
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
