// src/tools/mod.rs — Host-side tools callable from sandboxed code
//
// Tools never run inside the worker. The interceptor executes them on the host
// and pre-binds their results; the worker only ever sees raising stubs.

pub mod context_tools;
pub mod interceptor;
pub mod navigation;
pub mod subquery;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Prompt-facing description of a tool, generated from the live registry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    /// Call signature as written in a script, e.g. `peek(start, end)`.
    pub signature: String,
    /// A complete call with literal arguments, e.g. `peek(0, 200)`.
    pub example: String,
    pub description: String,
    pub returns: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run with already-parsed literal arguments.
    async fn call(&self, args: &[Value]) -> anyhow::Result<Value>;
}

/// Ordered set of registered tools. Registration order is prompt order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        self.tools.retain(|t| t.spec().name != name);
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.spec().name == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.spec().name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.spec().name).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }
}

// ─── Argument helpers ───────────────────────────────────────────────────────

pub(crate) fn arg_i64(args: &[Value], idx: usize, name: &str) -> anyhow::Result<i64> {
    match args.get(idx) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| anyhow::anyhow!("argument `{}` must be an integer", name)),
        Some(other) => anyhow::bail!("argument `{}` must be an integer, got {}", name, other),
        None => anyhow::bail!("missing argument `{}`", name),
    }
}

pub(crate) fn arg_str<'a>(args: &'a [Value], idx: usize, name: &str) -> anyhow::Result<&'a str> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => anyhow::bail!("argument `{}` must be a string, got {}", name, other),
        None => anyhow::bail!("missing argument `{}`", name),
    }
}

pub(crate) fn opt_str<'a>(args: &'a [Value], idx: usize) -> Option<&'a str> {
    args.get(idx).and_then(|v| v.as_str())
}

pub(crate) fn opt_i64(args: &[Value], idx: usize) -> Option<i64> {
    args.get(idx).and_then(|v| v.as_i64())
}
