// src/navigation.rs — Read-only symbol navigation over loaded source code
//
// `SourceIndex` is a line-oriented regex indexer. It is deliberately shallow:
// it finds declarations and their spans well enough to page through a file,
// not to resolve names.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lines per `read_symbol` chunk.
pub const CHUNK_LINES: usize = 80;

/// Maximum hits a single `search` returns.
pub const MAX_SEARCH_HITS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Enum,
    Trait,
    Impl,
    Class,
    Interface,
    Type,
    Module,
}

impl SymbolKind {
    fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Impl | SymbolKind::Class | SymbolKind::Trait | SymbolKind::Interface
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "fn",
            SymbolKind::Method => "method",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Trait => "trait",
            SymbolKind::Impl => "impl",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Module => "mod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Qualified name, e.g. `Parser::parse` or `Parser.parse`.
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub line_start: usize,
    pub line_end: usize,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolChunk {
    pub name: String,
    pub kind: SymbolKind,
    pub line_start: usize,
    pub line_end: usize,
    pub chunk: usize,
    pub total_chunks: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSummary {
    pub language: String,
    pub chars: usize,
    pub lines: usize,
    pub symbol_count: usize,
    pub kinds: BTreeMap<String, usize>,
}

/// Read-only navigation over one loaded source text.
pub trait NavigationService: Send + Sync {
    /// All symbols in source order.
    fn outline(&self) -> Vec<Symbol>;

    fn list_symbols(&self, prefix: Option<&str>) -> Vec<Symbol>;

    /// Page `chunk` (0-based) of a symbol's body.
    fn read_symbol(&self, name: &str, chunk: usize) -> anyhow::Result<SymbolChunk>;

    fn search(&self, pattern: &str) -> anyhow::Result<Vec<SearchHit>>;

    fn summary(&self) -> CodeSummary;
}

// ─── Language detection ─────────────────────────────────────────────────────

/// Normalize a user-supplied language name.
pub fn normalize_language(lang: &str) -> Option<&'static str> {
    match lang.trim().to_lowercase().as_str() {
        "rust" | "rs" => Some("rust"),
        "python" | "py" => Some("python"),
        "javascript" | "js" | "jsx" | "mjs" => Some("javascript"),
        "typescript" | "ts" | "tsx" => Some("typescript"),
        "go" | "golang" => Some("go"),
        _ => None,
    }
}

/// Guess the language from the source text.
pub fn guess_language(source: &str) -> &'static str {
    let has_line = |re: &Option<Regex>| {
        re.as_ref()
            .is_some_and(|re| source.lines().any(|l| re.is_match(l)))
    };

    static GO: OnceLock<Option<Regex>> = OnceLock::new();
    static RUST: OnceLock<Option<Regex>> = OnceLock::new();
    static PY: OnceLock<Option<Regex>> = OnceLock::new();
    static TS: OnceLock<Option<Regex>> = OnceLock::new();
    static JS: OnceLock<Option<Regex>> = OnceLock::new();

    let go = GO.get_or_init(|| re(r"^package\s+\w+\s*$"));
    let rust = RUST.get_or_init(|| {
        re(r"^\s*(pub(\([^)]*\))?\s+)?(fn|struct|enum|trait|impl|mod|use)\b.*[{;]\s*$")
    });
    let py = PY.get_or_init(|| re(r"^\s*(async\s+)?(def|class)\s+\w+.*:\s*(#.*|pass\s*)?$"));
    let ts = TS.get_or_init(|| {
        re(r"^\s*(export\s+)?(interface\s+\w+|type\s+\w+\s*=)|:\s*(string|number|boolean)\b")
    });
    let js = JS.get_or_init(|| re(r"^\s*(export\s+)?(function\b|const\s+\w+\s*=|class\s+\w+.*\{)"));

    if has_line(go) {
        "go"
    } else if has_line(rust) {
        "rust"
    } else if has_line(py) {
        "python"
    } else if has_line(ts) {
        "typescript"
    } else if has_line(js) {
        "javascript"
    } else {
        "text"
    }
}

/// Compile a constant pattern. A pattern that fails to compile is logged and
/// skipped, so indexing degrades instead of panicking.
fn re(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern, error = %e, "Invalid declaration pattern");
            None
        }
    }
}

// ─── Declaration patterns ───────────────────────────────────────────────────

struct DeclPattern {
    regex: Regex,
    kind: SymbolKind,
}

fn patterns_for(language: &str) -> &'static [DeclPattern] {
    static RUST: OnceLock<Vec<DeclPattern>> = OnceLock::new();
    static PYTHON: OnceLock<Vec<DeclPattern>> = OnceLock::new();
    static JS: OnceLock<Vec<DeclPattern>> = OnceLock::new();
    static GO: OnceLock<Vec<DeclPattern>> = OnceLock::new();

    let p = |pattern: &str, kind| re(pattern).map(|regex| DeclPattern { regex, kind });

    match language {
        "rust" => RUST.get_or_init(|| {
            vec![
                p(
                    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe)\s+)*(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#,
                    SymbolKind::Function,
                ),
                p(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>[A-Za-z_]\w*)",
                    SymbolKind::Struct,
                ),
                p(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>[A-Za-z_]\w*)",
                    SymbolKind::Enum,
                ),
                p(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_]\w*)",
                    SymbolKind::Trait,
                ),
                p(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>[A-Za-z_]\w*)",
                    SymbolKind::Type,
                ),
                p(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_]\w*)",
                    SymbolKind::Module,
                ),
                p(
                    r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[A-Za-z_][\w:]*(?:<[^>]*>)?\s+for\s+)?(?P<name>[A-Za-z_][\w:]*)",
                    SymbolKind::Impl,
                ),
            ]
            .into_iter()
            .flatten()
            .collect()
        }),
        "python" => PYTHON.get_or_init(|| {
            vec![
                p(r"^\s*(?:async\s+)?def\s+(?P<name>\w+)", SymbolKind::Function),
                p(r"^\s*class\s+(?P<name>\w+)", SymbolKind::Class),
            ]
            .into_iter()
            .flatten()
            .collect()
        }),
        "javascript" | "typescript" => JS.get_or_init(|| {
            vec![
                p(
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+(?P<name>\w+)",
                    SymbolKind::Function,
                ),
                p(
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>\w+)",
                    SymbolKind::Class,
                ),
                p(
                    r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>",
                    SymbolKind::Function,
                ),
                p(r"^\s*(?:export\s+)?interface\s+(?P<name>\w+)", SymbolKind::Interface),
                p(r"^\s*(?:export\s+)?type\s+(?P<name>\w+)\s*=", SymbolKind::Type),
                p(
                    r"^\s+(?:static\s+)?(?:async\s+)?(?P<name>[A-Za-z_]\w*)\s*\([^)]*\)\s*\{",
                    SymbolKind::Method,
                ),
            ]
            .into_iter()
            .flatten()
            .collect()
        }),
        "go" => GO.get_or_init(|| {
            vec![
                p(
                    r"^func\s+\(\s*\w+\s+\*?(?P<recv>\w+)\s*\)\s+(?P<name>\w+)",
                    SymbolKind::Method,
                ),
                p(r"^func\s+(?P<name>\w+)", SymbolKind::Function),
                p(r"^type\s+(?P<name>\w+)\s+struct\b", SymbolKind::Struct),
                p(r"^type\s+(?P<name>\w+)\s+interface\b", SymbolKind::Interface),
            ]
            .into_iter()
            .flatten()
            .collect()
        }),
        _ => &[],
    }
}

const JS_NON_METHODS: &[&str] = &["if", "for", "while", "switch", "catch", "function", "return"];

// ─── SourceIndex ────────────────────────────────────────────────────────────

pub struct SourceIndex {
    source: String,
    language: String,
    symbols: Vec<Symbol>,
}

impl SourceIndex {
    /// Index `source`. `language` is guessed when absent or unrecognized.
    pub fn build(source: &str, language: Option<&str>) -> Self {
        let language = language
            .and_then(normalize_language)
            .unwrap_or_else(|| guess_language(source));
        let lines: Vec<&str> = source.lines().collect();
        let symbols = index_symbols(&lines, language);
        tracing::debug!(language, symbols = symbols.len(), "Indexed source");
        Self {
            source: source.to_string(),
            language: language.to_string(),
            symbols,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn find(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name).or_else(|| {
            self.symbols
                .iter()
                .find(|s| short_name(&s.name) == name && s.kind != SymbolKind::Impl)
        })
    }
}

fn short_name(qualified: &str) -> &str {
    qualified
        .rsplit(|c| c == ':' || c == '.')
        .next()
        .unwrap_or(qualified)
}

/// Render an outline as indented text, one symbol per line.
pub fn render_outline(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(|s| {
            let indent = if s.parent.is_some() { "  " } else { "" };
            format!(
                "{}{} {} (L{}-L{})",
                indent,
                s.kind.as_str(),
                s.name,
                s.line_start,
                s.line_end
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl NavigationService for SourceIndex {
    fn outline(&self) -> Vec<Symbol> {
        self.symbols.clone()
    }

    fn list_symbols(&self, prefix: Option<&str>) -> Vec<Symbol> {
        match prefix {
            Some(p) if !p.is_empty() => self
                .symbols
                .iter()
                .filter(|s| s.name.starts_with(p) || short_name(&s.name).starts_with(p))
                .cloned()
                .collect(),
            _ => self.symbols.clone(),
        }
    }

    fn read_symbol(&self, name: &str, chunk: usize) -> anyhow::Result<SymbolChunk> {
        let symbol = match self.find(name) {
            Some(s) => s,
            None => {
                let similar: Vec<&str> = self
                    .symbols
                    .iter()
                    .filter(|s| s.name.to_lowercase().contains(&name.to_lowercase()))
                    .take(5)
                    .map(|s| s.name.as_str())
                    .collect();
                if similar.is_empty() {
                    anyhow::bail!("symbol `{}` not found", name);
                }
                anyhow::bail!(
                    "symbol `{}` not found; similar: {}",
                    name,
                    similar.join(", ")
                );
            }
        };

        let span = symbol.line_end - symbol.line_start + 1;
        let total_chunks = span.div_ceil(CHUNK_LINES).max(1);
        if chunk >= total_chunks {
            anyhow::bail!(
                "chunk {} out of range: `{}` has {} chunk(s)",
                chunk,
                symbol.name,
                total_chunks
            );
        }

        let first = symbol.line_start + chunk * CHUNK_LINES;
        let last = (first + CHUNK_LINES - 1).min(symbol.line_end);
        let text = self
            .source
            .lines()
            .skip(first - 1)
            .take(last - first + 1)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SymbolChunk {
            name: symbol.name.clone(),
            kind: symbol.kind,
            line_start: first,
            line_end: last,
            chunk,
            total_chunks,
            text,
        })
    }

    fn search(&self, pattern: &str) -> anyhow::Result<Vec<SearchHit>> {
        let regex = Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid regex `{}`: {}", pattern, e))?;
        Ok(self
            .source
            .lines()
            .enumerate()
            .filter(|(_, l)| regex.is_match(l))
            .take(MAX_SEARCH_HITS)
            .map(|(i, l)| SearchHit {
                line: i + 1,
                text: l.to_string(),
            })
            .collect())
    }

    fn summary(&self) -> CodeSummary {
        let mut kinds = BTreeMap::new();
        for s in &self.symbols {
            *kinds.entry(s.kind.as_str().to_string()).or_insert(0) += 1;
        }
        CodeSummary {
            language: self.language.clone(),
            chars: self.source.chars().count(),
            lines: self.source.lines().count(),
            symbol_count: self.symbols.len(),
            kinds,
        }
    }
}

// ─── Indexing ───────────────────────────────────────────────────────────────

fn index_symbols(lines: &[&str], language: &str) -> Vec<Symbol> {
    let patterns = patterns_for(language);
    let mut symbols = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        for pat in patterns {
            let Some(caps) = pat.regex.captures(line) else {
                continue;
            };
            let Some(name) = caps.name("name").map(|m| m.as_str()) else {
                continue;
            };
            if pat.kind == SymbolKind::Method
                && language != "go"
                && JS_NON_METHODS.contains(&name)
            {
                continue;
            }
            let name = match caps.name("recv") {
                Some(recv) => format!("{}.{}", recv.as_str(), name),
                None => name.to_string(),
            };
            let line_end = if language == "python" {
                indent_block_end(lines, idx)
            } else {
                brace_block_end(lines, idx)
            };
            symbols.push(Symbol {
                name,
                kind: pat.kind,
                line_start: idx + 1,
                line_end: line_end + 1,
                parent: None,
            });
            break;
        }
    }

    qualify_members(&mut symbols, language);
    symbols
}

/// Last line (0-based) of a brace-delimited declaration starting at `start`.
fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i64 = 0;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                ';' if !opened => return idx,
                _ => {}
            }
            if opened && depth <= 0 {
                return idx;
            }
        }
    }
    if opened {
        lines.len().saturating_sub(1)
    } else {
        start
    }
}

/// Last line (0-based) of an indentation-delimited block starting at `start`.
fn indent_block_end(lines: &[&str], start: usize) -> usize {
    let indent = |l: &str| l.len() - l.trim_start().len();
    let base = indent(lines[start]);
    let mut end = start;
    for (idx, line) in lines.iter().enumerate().skip(start + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent(line) <= base {
            break;
        }
        end = idx;
    }
    end
}

/// Attach members to their innermost enclosing container and qualify their names.
fn qualify_members(symbols: &mut [Symbol], language: &str) {
    let sep = if language == "rust" { "::" } else { "." };
    let containers: Vec<(String, usize, usize)> = symbols
        .iter()
        .filter(|s| s.kind.is_container())
        .map(|s| (s.name.clone(), s.line_start, s.line_end))
        .collect();

    for sym in symbols.iter_mut() {
        let parent = containers
            .iter()
            .filter(|(name, start, end)| {
                *start < sym.line_start && sym.line_end <= *end && *name != sym.name
            })
            .max_by_key(|(_, start, _)| *start);
        if let Some((parent, _, _)) = parent {
            if sym.kind == SymbolKind::Function {
                sym.kind = SymbolKind::Method;
            }
            sym.name = format!("{}{}{}", parent, sep, sym.name);
            sym.parent = Some(parent.clone());
        }
    }
}
