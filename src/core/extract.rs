// src/core/extract.rs — Pull runnable code blocks out of a model reply

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

/// Fence tags treated as runnable. An untagged fence also counts.
const RUNNABLE_TAGS: &[&str] = &["rhai", "repl"];

/// Fenced code blocks in document order. Indented blocks and fences tagged
/// with any other language are prose.
pub fn extract_code_blocks(markdown: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                if is_runnable(&info) {
                    current = Some(String::new());
                }
            }
            Event::Text(text) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(code) = current.take() {
                    if !code.trim().is_empty() {
                        blocks.push(code);
                    }
                }
            }
            _ => {}
        }
    }
    blocks
}

fn is_runnable(info: &str) -> bool {
    let tag = info.split_whitespace().next().unwrap_or("");
    tag.is_empty() || RUNNABLE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}
