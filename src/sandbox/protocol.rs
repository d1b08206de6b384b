// src/sandbox/protocol.rs — Parent/worker wire format (one JSON document each way)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hidden CLI subcommand that turns the binary into a worker.
pub const WORKER_SUBCOMMAND: &str = "sandbox-worker";

/// Scope slot for the assignment form of the final signal.
pub const FINAL_ANSWER_VAR: &str = "FINAL_ANSWER";

pub type Namespace = BTreeMap<String, Value>;

/// Written by the parent to the worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    pub namespace: Namespace,
    /// Registered tool names; each becomes a raising stub in the worker.
    pub stubs: Vec<String>,
    pub max_print_chars: usize,
}

/// Written by the worker to its stdout. Nothing else may be written there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    /// Bindings that are new or changed relative to the request namespace.
    #[serde(default)]
    pub updates: Namespace,
}
