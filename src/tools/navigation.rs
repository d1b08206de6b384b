// src/tools/navigation.rs — Tool wrappers over a NavigationService

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{arg_str, opt_i64, opt_str, Tool, ToolSpec};
use crate::navigation::{render_outline, NavigationService};

type Nav = Arc<dyn NavigationService>;

pub struct OutlineTool(pub Nav);
pub struct ListSymbolsTool(pub Nav);
pub struct ReadSymbolTool(pub Nav);
pub struct SearchCodeTool(pub Nav);
pub struct CodeSummaryTool(pub Nav);

fn spec(name: &str, signature: &str, example: &str, description: &str, returns: &str) -> ToolSpec {
    ToolSpec {
        name: name.into(),
        signature: signature.into(),
        example: example.into(),
        description: description.into(),
        returns: returns.into(),
    }
}

#[async_trait]
impl Tool for OutlineTool {
    fn spec(&self) -> ToolSpec {
        spec(
            "outline",
            "outline()",
            "outline()",
            "Every declaration in the source with its line span, members indented.",
            "string",
        )
    }

    async fn call(&self, _args: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::String(render_outline(&self.0.outline())))
    }
}

#[async_trait]
impl Tool for ListSymbolsTool {
    fn spec(&self) -> ToolSpec {
        spec(
            "list_symbols",
            "list_symbols(prefix)",
            r#"list_symbols("")"#,
            "Symbols whose qualified or short name starts with `prefix` (\"\" for all).",
            "array of #{name, kind, line_start, line_end}",
        )
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let symbols = self.0.list_symbols(opt_str(args, 0));
        Ok(Value::Array(
            symbols
                .into_iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "kind": s.kind.as_str(),
                        "line_start": s.line_start,
                        "line_end": s.line_end,
                    })
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl Tool for ReadSymbolTool {
    fn spec(&self) -> ToolSpec {
        spec(
            "read_symbol",
            "read_symbol(name, chunk)",
            r#"read_symbol("main", 0)"#,
            "Body of a symbol, 80 lines per chunk starting at chunk 0. \
             Check `total_chunks` to page further.",
            "#{name, kind, line_start, line_end, chunk, total_chunks, text}",
        )
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let name = arg_str(args, 0, "name")?;
        let chunk = opt_i64(args, 1).unwrap_or(0);
        if chunk < 0 {
            anyhow::bail!("argument `chunk` must not be negative");
        }
        let chunk = self.0.read_symbol(name, chunk as usize)?;
        Ok(serde_json::to_value(chunk)?)
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn spec(&self) -> ToolSpec {
        spec(
            "search_code",
            "search_code(pattern)",
            r#"search_code("impl ")"#,
            "Regex search over the source, line by line.",
            "array of #{line, text}",
        )
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let pattern = arg_str(args, 0, "pattern")?;
        Ok(serde_json::to_value(self.0.search(pattern)?)?)
    }
}

#[async_trait]
impl Tool for CodeSummaryTool {
    fn spec(&self) -> ToolSpec {
        spec(
            "code_summary",
            "code_summary()",
            "code_summary()",
            "Language, size and symbol counts of the loaded source.",
            "#{language, chars, lines, symbol_count, kinds}",
        )
    }

    async fn call(&self, _args: &[Value]) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.0.summary())?)
    }
}

/// The navigation tool set for a code context.
pub fn navigation_tools(nav: &Nav) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(OutlineTool(Arc::clone(nav))),
        Arc::new(ListSymbolsTool(Arc::clone(nav))),
        Arc::new(ReadSymbolTool(Arc::clone(nav))),
        Arc::new(SearchCodeTool(Arc::clone(nav))),
        Arc::new(CodeSummaryTool(Arc::clone(nav))),
    ]
}
