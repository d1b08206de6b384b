// src/tools/context_tools.rs — Generic tools over a loaded text context

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{arg_i64, arg_str, Tool, ToolSpec};

/// Maximum matches a single `grep` returns.
pub const MAX_GREP_MATCHES: usize = 200;

/// Shared read-only view of the loaded text.
#[derive(Debug, Clone)]
pub struct TextContext {
    text: Arc<str>,
}

impl TextContext {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Chars in `[start, end)`, clamped to the text. Negative indices count from the end.
    pub fn peek(&self, start: i64, end: i64) -> String {
        let len = self.text.chars().count() as i64;
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
        let (s, e) = (norm(start), norm(end));
        if s >= e {
            return String::new();
        }
        self.text
            .chars()
            .skip(s as usize)
            .take((e - s) as usize)
            .collect()
    }

    /// Lines `start..=end`, 1-based.
    pub fn lines(&self, start: i64, end: i64) -> String {
        let start = start.max(1) as usize;
        if end < start as i64 {
            return String::new();
        }
        self.text
            .lines()
            .skip(start - 1)
            .take(end as usize - start + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn grep(&self, pattern: &str) -> anyhow::Result<Vec<Value>> {
        let re = Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid regex `{}`: {}", pattern, e))?;
        Ok(self
            .text
            .lines()
            .enumerate()
            .filter(|(_, line)| re.is_match(line))
            .take(MAX_GREP_MATCHES)
            .map(|(i, line)| json!({ "line": i + 1, "text": line }))
            .collect())
    }
}

pub struct PeekTool(pub TextContext);
pub struct GrepTool(pub TextContext);
pub struct LinesTool(pub TextContext);

#[async_trait]
impl Tool for PeekTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peek".into(),
            signature: "peek(start, end)".into(),
            example: "peek(0, 200)".into(),
            description: "Characters of the context from `start` (inclusive) to `end` (exclusive). \
                          Negative indices count from the end."
                .into(),
            returns: "string".into(),
        }
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let start = arg_i64(args, 0, "start")?;
        let end = arg_i64(args, 1, "end")?;
        Ok(Value::String(self.0.peek(start, end)))
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep".into(),
            signature: "grep(pattern)".into(),
            example: r#"grep("TODO")"#.into(),
            description: format!(
                "Regex search over the context, line by line (at most {} matches).",
                MAX_GREP_MATCHES
            ),
            returns: "array of #{line, text}".into(),
        }
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let pattern = arg_str(args, 0, "pattern")?;
        Ok(Value::Array(self.0.grep(pattern)?))
    }
}

#[async_trait]
impl Tool for LinesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "lines".into(),
            signature: "lines(start, end)".into(),
            example: "lines(1, 40)".into(),
            description: "Lines `start` through `end` of the context, 1-based and inclusive.".into(),
            returns: "string".into(),
        }
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let start = arg_i64(args, 0, "start")?;
        let end = arg_i64(args, 1, "end")?;
        Ok(Value::String(self.0.lines(start, end)))
    }
}

/// The generic tool set for a plain-text context.
pub fn context_tools(ctx: &TextContext) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(PeekTool(ctx.clone())),
        Arc::new(GrepTool(ctx.clone())),
        Arc::new(LinesTool(ctx.clone())),
    ]
}
