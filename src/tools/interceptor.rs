// src/tools/interceptor.rs — Static tool-call detection and host-side execution
//
// Code reaching the worker cannot call back into the host, so tool calls are
// found in the script text before it is sent. Exactly one statement shape is
// supported:
//
//     [let] <ident> = <tool>(<literal>, ...)[;]
//
// at the top level of the script. Each match runs here, and the statement is
// rewritten in place to `let <ident> = __tool_<n>;` with the result bound to
// that private slot for this block only. The binding therefore lands exactly
// where the call was written. Any other use of a tool name as a call is a
// misuse, and a block with a misuse never reaches a worker.

use serde::Serialize;
use serde_json::Value;

use super::ToolRegistry;
use crate::core::trace::{TraceKind, TraceLog};

/// Slot names start with `_`, so the worker never persists them.
pub const SLOT_PREFIX: &str = "__tool_";

// ─── Lexer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    /// Backtick strings may interpolate, so they never count as literals.
    Template,
    Punct(&'static str),
    Other(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
    line: usize,
}

const TWO_CHAR_OPS: &[&str] = &[
    "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "=>", "&&", "||",
    "::", "..", "?.", "??", "<<", ">>", "**",
];

const ONE_CHAR_PUNCT: &[&str] = &[
    "(", ")", "[", "]", "{", "}", ",", ";", "=", ".", "-", "+", "*", "/", "%", "<", ">", "!",
    "&", "|", "^", "?", ":", "#", "@", "$",
];

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tokens(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(c) = self.peek(0) {
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '/' && self.peek(1) == Some('/') {
                while let Some(c) = self.peek(0) {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            if c == '/' && self.peek(1) == Some('*') {
                self.block_comment();
                continue;
            }

            let start = self.offset();
            let line = self.line;
            let tok = if c == '"' || c == '\'' {
                self.bump();
                Tok::Str(self.quoted(c))
            } else if c == '`' {
                self.bump();
                self.skip_until('`');
                Tok::Template
            } else if c == '#' && matches!(self.peek(1), Some('"') | Some('#')) && self.is_raw_start() {
                Tok::Str(self.raw_string())
            } else if c.is_ascii_digit() {
                Tok::Num(self.number())
            } else if c.is_alphabetic() || c == '_' {
                let mut ident = String::new();
                while let Some(c) = self.peek(0) {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Tok::Ident(ident)
            } else {
                self.punct()
            };
            out.push(Token {
                tok,
                start,
                end: self.offset(),
                line,
            });
        }
        out
    }

    fn block_comment(&mut self) {
        self.bump();
        self.bump();
        let mut depth = 1;
        while depth > 0 {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => break,
            }
        }
    }

    fn quoted(&mut self, quote: char) -> String {
        let mut value = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    // Line continuation
                    Some('\n') => {}
                    Some(other) => value.push(other),
                    None => break,
                },
                c if c == quote => break,
                c => value.push(c),
            }
        }
        value
    }

    fn skip_until(&mut self, end: char) {
        while let Some(c) = self.bump() {
            if c == end {
                break;
            }
        }
    }

    fn is_raw_start(&self) -> bool {
        let mut i = 0;
        while self.peek(i) == Some('#') {
            i += 1;
        }
        self.peek(i) == Some('"')
    }

    /// `#"..."#`, with any number of hashes.
    fn raw_string(&mut self) -> String {
        let mut hashes = 0;
        while self.peek(0) == Some('#') {
            self.bump();
            hashes += 1;
        }
        self.bump();
        let mut value = String::new();
        while let Some(c) = self.bump() {
            if c == '"' && (0..hashes).all(|i| self.peek(i) == Some('#')) {
                for _ in 0..hashes {
                    self.bump();
                }
                break;
            }
            value.push(c);
        }
        value
    }

    fn number(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            let exponent_sign = (c == '+' || c == '-')
                && text.ends_with(['e', 'E'])
                && !text.starts_with("0x");
            let fraction = c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_alphanumeric() || c == '_' || exponent_sign || fraction {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        text
    }

    fn punct(&mut self) -> Tok {
        if let (Some(a), Some(b)) = (self.peek(0), self.peek(1)) {
            let pair: String = [a, b].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                self.bump();
                self.bump();
                return Tok::Punct(*op);
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        self.bump();
        let mut buf = [0u8; 4];
        let s: &str = c.encode_utf8(&mut buf);
        match ONE_CHAR_PUNCT.iter().find(|p| **p == s) {
            Some(p) => Tok::Punct(*p),
            None => Tok::Other(c),
        }
    }
}

// ─── Scan results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub variable: String,
    /// Private name the host result is bound to for this block only.
    pub slot: String,
    pub tool: String,
    pub args: Vec<Value>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MisuseReason {
    BareCall,
    Nested,
    NonLiteral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMisuse {
    pub tool: String,
    pub line: usize,
    pub reason: MisuseReason,
}

impl std::fmt::Display for ToolMisuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = &self.tool;
        match self.reason {
            MisuseReason::BareCall => write!(
                f,
                "line {}: `{t}(...)` is a bare call and its result would be lost. \
                 Tool calls must be assigned to a variable: `result = {t}(...);`",
                self.line
            ),
            MisuseReason::Nested => write!(
                f,
                "line {}: `{t}(...)` is used inside a larger expression or block. \
                 Tool calls must be assigned to a variable in their own top-level \
                 statement: `result = {t}(...);` then use `result`.",
                self.line
            ),
            MisuseReason::NonLiteral => write!(
                f,
                "line {}: `{t}(...)` has a non-literal argument. Tool calls must be \
                 assigned to a variable and take only literal arguments \
                 (quoted strings, numbers, true/false).",
                self.line
            ),
        }
    }
}

/// Outcome of scanning one code block.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// `code` reads each intercepted result from its slot, in statement order.
    Ready { code: String, calls: Vec<ToolCall> },
    Misuse(Vec<ToolMisuse>),
}

// ─── Scanner ────────────────────────────────────────────────────────────────

/// Find every registered tool call in `code` and classify it.
pub fn scan(code: &str, registry: &ToolRegistry) -> ScanOutcome {
    let tokens = Lexer::new(code).tokens();
    let mut calls = Vec::new();
    let mut rewrites = Vec::new();
    let mut misuses = Vec::new();

    let mut depth: usize = 0;
    let mut stmt_start = 0;

    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i].tok {
            Tok::Punct("(") | Tok::Punct("[") | Tok::Punct("{") => depth += 1,
            Tok::Punct(")") | Tok::Punct("]") => depth = depth.saturating_sub(1),
            Tok::Punct("}") => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    stmt_start = i + 1;
                }
            }
            Tok::Punct(";") if depth == 0 => stmt_start = i + 1,
            Tok::Ident(name) if is_tool_call(&tokens, i, registry, name) => {
                let line = tokens[i].line;
                let misuse = |reason| ToolMisuse {
                    tool: name.clone(),
                    line,
                    reason,
                };
                if depth > 0 {
                    misuses.push(misuse(MisuseReason::Nested));
                } else {
                    match match_statement(&tokens, stmt_start, i) {
                        Ok(m) => {
                            tracing::debug!(tool = %name, variable = %m.call.variable, "Intercepted tool call");
                            let slot = format!("{}{}", SLOT_PREFIX, calls.len());
                            rewrites.push(Rewrite {
                                start: tokens[stmt_start].start,
                                end: m.end_offset,
                                text: format!("let {} = {};", m.call.variable, slot),
                            });
                            calls.push(ToolCall {
                                line,
                                slot,
                                ..m.call
                            });
                            // Resume after the statement; its tokens are fully consumed.
                            i = m.next_index;
                            stmt_start = i;
                            continue;
                        }
                        Err(reason) => misuses.push(misuse(reason)),
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    if !misuses.is_empty() {
        return ScanOutcome::Misuse(misuses);
    }
    ScanOutcome::Ready {
        code: apply_rewrites(code, &rewrites),
        calls,
    }
}

fn is_tool_call(tokens: &[Token], i: usize, registry: &ToolRegistry, name: &str) -> bool {
    if !registry.contains(name) {
        return false;
    }
    if tokens.get(i + 1).map(|t| &t.tok) != Some(&Tok::Punct("(")) {
        return false;
    }
    // Method calls, module paths and function definitions reuse the name
    // without calling the tool.
    match i.checked_sub(1).map(|p| &tokens[p].tok) {
        Some(Tok::Punct(".")) | Some(Tok::Punct("?.")) | Some(Tok::Punct("::")) => false,
        Some(Tok::Ident(kw)) if kw == "fn" => false,
        _ => true,
    }
}

struct StatementMatch {
    call: ToolCall,
    end_offset: usize,
    next_index: usize,
}

/// Match `[let] ident = tool(lit, ...)[;]` where `tool` is at `tool_idx`.
fn match_statement(
    tokens: &[Token],
    stmt_start: usize,
    tool_idx: usize,
) -> Result<StatementMatch, MisuseReason> {
    let prefix = &tokens[stmt_start..tool_idx];
    let variable = match prefix {
        [] => return Err(MisuseReason::BareCall),
        [Token { tok: Tok::Ident(v), .. }, Token { tok: Tok::Punct("="), .. }]
            if !is_keyword(v) =>
        {
            v.clone()
        }
        [Token { tok: Tok::Ident(kw), .. }, Token { tok: Tok::Ident(v), .. }, Token { tok: Tok::Punct("="), .. }]
            if kw == "let" && !is_keyword(v) =>
        {
            v.clone()
        }
        _ => return Err(MisuseReason::Nested),
    };

    let tool = match &tokens[tool_idx].tok {
        Tok::Ident(t) => t.clone(),
        _ => return Err(MisuseReason::Nested),
    };

    // Arguments: literal (, literal)* then `)`
    let mut args = Vec::new();
    let mut j = tool_idx + 2;
    let mut non_literal = false;
    let mut expect_value = true;
    let close = loop {
        let Some(tok) = tokens.get(j) else {
            // Unbalanced; let the script engine report the syntax error.
            return Err(MisuseReason::NonLiteral);
        };
        match &tok.tok {
            // Also covers `tool()` and a trailing comma.
            Tok::Punct(")") => break j,
            Tok::Punct(",") if !expect_value => expect_value = true,
            _ if expect_value => {
                match literal_at(tokens, j) {
                    Some((value, consumed)) => {
                        args.push(value);
                        j += consumed - 1;
                    }
                    None => {
                        non_literal = true;
                        j = skip_argument(tokens, j);
                        args.push(Value::Null);
                        expect_value = false;
                        continue;
                    }
                }
                expect_value = false;
            }
            _ => {
                non_literal = true;
                j = skip_argument(tokens, j);
                continue;
            }
        }
        j += 1;
    };
    if non_literal {
        return Err(MisuseReason::NonLiteral);
    }

    // Terminator: `;`, end of input, or a new line.
    let after = close + 1;
    let (end_offset, next_index) = match tokens.get(after) {
        None => (tokens[close].end, after),
        Some(t) if t.tok == Tok::Punct(";") => (t.end, after + 1),
        Some(t) if t.line > tokens[close].line => (tokens[close].end, after),
        Some(_) => return Err(MisuseReason::Nested),
    };

    Ok(StatementMatch {
        call: ToolCall {
            variable,
            slot: String::new(),
            tool,
            args,
            line: 0,
        },
        end_offset,
        next_index,
    })
}

/// Parse a literal starting at `j`. Returns the value and the tokens consumed.
fn literal_at(tokens: &[Token], j: usize) -> Option<(Value, usize)> {
    let literal = match &tokens.get(j)?.tok {
        Tok::Str(s) => Some((Value::String(s.clone()), 1)),
        Tok::Num(n) => Some((parse_number(n, false)?, 1)),
        Tok::Ident(b) if b == "true" => Some((Value::Bool(true), 1)),
        Tok::Ident(b) if b == "false" => Some((Value::Bool(false), 1)),
        Tok::Punct("-") => match &tokens.get(j + 1)?.tok {
            Tok::Num(n) => Some((parse_number(n, true)?, 2)),
            _ => None,
        },
        _ => None,
    };
    literal.filter(|(_, consumed)| {
        // A literal must be followed directly by `,` or `)`.
        matches!(
            tokens.get(j + consumed).map(|t| &t.tok),
            Some(Tok::Punct(",")) | Some(Tok::Punct(")"))
        )
    })
}

/// Skip one (non-literal) argument expression, stopping before `,` or `)` at its level.
fn skip_argument(tokens: &[Token], mut j: usize) -> usize {
    let mut depth = 0usize;
    while let Some(t) = tokens.get(j) {
        match t.tok {
            Tok::Punct("(") | Tok::Punct("[") | Tok::Punct("{") => depth += 1,
            Tok::Punct(")") | Tok::Punct("]") | Tok::Punct("}") if depth > 0 => depth -= 1,
            Tok::Punct(")") | Tok::Punct(",") if depth == 0 => return j,
            _ => {}
        }
        j += 1;
    }
    j
}

fn parse_number(text: &str, negative: bool) -> Option<Value> {
    let clean = text.replace('_', "");
    let sign = if negative { -1 } else { 1 };
    if let Some(hex) = clean.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(|n| Value::from(sign * n));
    }
    if clean.contains(['.', 'e', 'E']) {
        let f: f64 = clean.parse().ok()?;
        return serde_json::Number::from_f64(sign as f64 * f).map(Value::Number);
    }
    clean.parse::<i64>().ok().map(|n| Value::from(sign * n))
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "let" | "const" | "if" | "else" | "while" | "loop" | "for" | "in" | "fn" | "return"
            | "true" | "false" | "this" | "import" | "export" | "switch" | "do" | "until"
            | "break" | "continue" | "throw" | "try" | "catch"
    )
}

struct Rewrite {
    start: usize,
    end: usize,
    text: String,
}

/// Replace each intercepted statement, keeping its newlines so line numbers
/// in later errors still match the model's code.
fn apply_rewrites(code: &str, rewrites: &[Rewrite]) -> String {
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for r in rewrites {
        out.push_str(&code[cursor..r.start]);
        out.push_str(&r.text);
        out.extend(code[r.start..r.end].chars().filter(|&c| c == '\n'));
        cursor = r.end;
    }
    out.push_str(&code[cursor..]);
    out
}

/// Render misuse reasons as feedback for the model.
pub fn misuse_feedback(misuses: &[ToolMisuse]) -> String {
    let mut text = String::from(
        "Tool call rejected before execution. Nothing in this block ran.\n",
    );
    for m in misuses {
        text.push_str("- ");
        text.push_str(&m.to_string());
        text.push('\n');
    }
    text
}

/// Run intercepted calls on the host, in order. Results are keyed by slot.
/// Tool errors become strings.
pub async fn execute_calls(
    calls: &[ToolCall],
    registry: &ToolRegistry,
    trace: &TraceLog,
) -> Vec<(String, Value)> {
    let mut bindings = Vec::with_capacity(calls.len());
    for call in calls {
        let result = match registry.get(&call.tool) {
            Some(tool) => tool.call(&call.args).await,
            None => Err(anyhow::anyhow!("unknown tool `{}`", call.tool)),
        };
        let (value, ok) = match result {
            Ok(v) => (v, true),
            Err(e) => {
                tracing::warn!(tool = %call.tool, error = %e, "Intercepted tool failed");
                (Value::String(format!("[tool error] {}", e)), false)
            }
        };
        trace.record(TraceKind::ToolIntercepted {
            tool: call.tool.clone(),
            variable: call.variable.clone(),
            ok,
        });
        bindings.push((call.slot.clone(), value));
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context_tools::{context_tools, TextContext};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for tool in context_tools(&TextContext::new("one\ntwo\nthree")) {
            reg.register(tool);
        }
        reg
    }

    fn ready(code: &str) -> (String, Vec<ToolCall>) {
        match scan(code, &registry()) {
            ScanOutcome::Ready { code, calls } => (code, calls),
            ScanOutcome::Misuse(m) => panic!("unexpected misuse: {:?}", m),
        }
    }

    fn misuses(code: &str) -> Vec<ToolMisuse> {
        match scan(code, &registry()) {
            ScanOutcome::Misuse(m) => m,
            other => panic!("expected misuse, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_rewritten_to_read_slot() {
        let (code, calls) = ready("let head = peek(0, 3);\nprint(head);");
        assert_eq!(
            calls,
            vec![ToolCall {
                variable: "head".into(),
                slot: "__tool_0".into(),
                tool: "peek".into(),
                args: vec![json!(0), json!(3)],
                line: 1,
            }]
        );
        assert_eq!(code, "let head = __tool_0;\nprint(head);");
    }

    #[test]
    fn test_rewrites_keep_program_order() {
        let src = "let head = \"stale\";\nhead = peek(0, 3);\nlet first = head;\nlet head = peek(4, 5);";
        let (code, calls) = ready(src);
        let slots: Vec<(&str, &str)> = calls
            .iter()
            .map(|c| (c.variable.as_str(), c.slot.as_str()))
            .collect();
        assert_eq!(slots, vec![("head", "__tool_0"), ("head", "__tool_1")]);
        assert_eq!(
            code,
            "let head = \"stale\";\nlet head = __tool_0;\nlet first = head;\nlet head = __tool_1;"
        );
    }

    #[test]
    fn test_multiline_call_keeps_line_count() {
        let (code, calls) = ready("let hits = grep(\n  \"a\"\n);\nprint(hits);");
        assert_eq!(calls[0].line, 1);
        assert_eq!(code, "let hits = __tool_0;\n\n\nprint(hits);");
    }

    #[test]
    fn test_literal_kinds() {
        let (_, calls) = ready(r#"x = grep('a\'b'); y = lines(-1, 2.5); z = peek(0x10, 1_000)"#);
        assert_eq!(calls[0].args, vec![json!("a'b")]);
        assert_eq!(calls[1].args, vec![json!(-1), json!(2.5)]);
        assert_eq!(calls[2].args, vec![json!(16), json!(1000)]);
    }

    #[test]
    fn test_newline_terminated_statement() {
        let (code, calls) = ready("hits = grep(\"t\")\nprint(hits.len());");
        assert_eq!(calls.len(), 1);
        assert_eq!(code, "let hits = __tool_0;\nprint(hits.len());");
    }

    #[test]
    fn test_bare_call_rejected() {
        let m = misuses("peek(0, 10);");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].reason, MisuseReason::BareCall);
        assert!(m[0].to_string().contains("assigned"));
    }

    #[test]
    fn test_nested_and_compound_rejected() {
        let m = misuses("print(peek(0, 1));\nx = peek(0, 1) + \"!\";\nif true { y = grep(\"a\"); }");
        let reasons: Vec<(usize, MisuseReason)> = m.iter().map(|m| (m.line, m.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (1, MisuseReason::Nested),
                (2, MisuseReason::Nested),
                (3, MisuseReason::Nested),
            ]
        );
        assert!(m.iter().all(|m| m.to_string().contains("assigned")));
    }

    #[test]
    fn test_non_literal_rejected() {
        let m = misuses("let n = 3;\nx = peek(0, n);\ny = grep(`${n}`);");
        assert_eq!(m.len(), 2);
        assert!(m.iter().all(|m| m.reason == MisuseReason::NonLiteral));
        assert_eq!(m[1].line, 3);
    }

    #[test]
    fn test_all_misuses_reported_together() {
        let m = misuses("grep(\"a\");\nlet ok = peek(0, 1);\nlines(1, 2);");
        assert_eq!(m.len(), 2);
        assert_eq!((m[0].line, m[1].line), (1, 3));
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let src = "// peek(0, 1);\n/* grep(\"x\") */\nlet s = \"lines(1, 2)\";\nprint(s);";
        let (code, calls) = ready(src);
        assert!(calls.is_empty());
        assert_eq!(code, src);
    }

    #[test]
    fn test_method_and_definition_are_not_calls() {
        let (_, calls) = ready("fn peek(a) { a }\nlet s = \"x\"; let n = s.lines(1, 2); let m = text::grep(s);");
        assert!(calls.is_empty());
    }

    #[test]
    fn test_equality_is_not_assignment() {
        let m = misuses("x == peek(0, 1);");
        assert_eq!(m[0].reason, MisuseReason::Nested);
    }

    #[test]
    fn test_misuse_feedback_lists_every_reason() {
        let m = misuses("peek(0, 1);\nlines(1, 2);");
        let text = misuse_feedback(&m);
        assert!(text.contains("Nothing in this block ran"));
        assert_eq!(text.matches("assigned").count(), 2);
    }

    #[tokio::test]
    async fn test_execute_calls_binds_results_and_errors() {
        let reg = registry();
        let trace = TraceLog::new("s");
        let calls = vec![
            ToolCall {
                variable: "first".into(),
                slot: "__tool_0".into(),
                tool: "lines".into(),
                args: vec![json!(1), json!(1)],
                line: 1,
            },
            ToolCall {
                variable: "bad".into(),
                slot: "__tool_1".into(),
                tool: "grep".into(),
                args: vec![json!("(")],
                line: 2,
            },
        ];
        let bindings = execute_calls(&calls, &reg, &trace).await;
        assert_eq!(bindings[0], ("__tool_0".to_string(), json!("one")));
        assert!(bindings[1].1.as_str().unwrap().starts_with("[tool error]"));
        assert_eq!(trace.len(), 2);
    }
}
