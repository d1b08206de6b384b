// src/core/truncation.rs — Output truncation
//
// Limits captured output and feedback text so a chatty script cannot blow up
// the next prompt. Bounds are in chars, never bytes, so UTF-8 is never split.

/// Result of a truncation operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationResult {
    /// The (possibly truncated) content, including the note when truncated.
    pub content: String,
    pub was_truncated: bool,
    /// Original size in chars.
    pub original_chars: usize,
}

/// Truncate to at most `max_chars` chars of content, appending a note when cut.
pub fn truncate_output(content: &str, max_chars: usize) -> TruncationResult {
    let original_chars = content.chars().count();
    if original_chars <= max_chars {
        return TruncationResult {
            content: content.to_string(),
            was_truncated: false,
            original_chars,
        };
    }

    let kept: String = content.chars().take(max_chars).collect();
    TruncationResult {
        content: format!(
            "{}\n[Output truncated: showing {} of {} chars]",
            kept, max_chars, original_chars
        ),
        was_truncated: true,
        original_chars,
    }
}

/// Keep only the last `max_chars` chars (used for crash stderr tails).
pub fn tail_chars(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    content.chars().skip(total - max_chars).collect()
}

/// A push-only buffer that stops growing at its cap and remembers that it did.
#[derive(Debug, Clone, Default)]
pub struct BoundedBuffer {
    buf: String,
    chars: usize,
    cap: usize,
    overflowed: usize,
}

impl BoundedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            ..Default::default()
        }
    }

    pub fn push_line(&mut self, line: &str) {
        for c in line.chars().chain(std::iter::once('\n')) {
            if self.chars < self.cap {
                self.buf.push(c);
                self.chars += 1;
            } else {
                self.overflowed += 1;
            }
        }
    }

    pub fn finish(self) -> String {
        if self.overflowed == 0 {
            self.buf
        } else {
            format!(
                "{}\n[Output truncated: {} more chars dropped]",
                self.buf, self.overflowed
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_not_truncated() {
        let result = truncate_output("hello world", 100);
        assert!(!result.was_truncated);
        assert_eq!(result.content, "hello world");
    }

    #[test]
    fn test_long_output_truncated() {
        let long = "x".repeat(500);
        let result = truncate_output(&long, 100);
        assert!(result.was_truncated);
        assert!(result.content.starts_with(&"x".repeat(100)));
        assert!(result.content.contains("[Output truncated: showing 100 of 500 chars]"));
        assert_eq!(result.original_chars, 500);
    }

    #[test]
    fn test_exactly_at_limit_not_truncated() {
        let content = "x".repeat(64);
        assert!(!truncate_output(&content, 64).was_truncated);
    }

    #[test]
    fn test_multibyte_is_char_bounded() {
        let result = truncate_output("ééééé", 2);
        assert!(result.content.starts_with("éé\n"));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[test]
    fn test_bounded_buffer_caps() {
        let mut buf = BoundedBuffer::new(8);
        buf.push_line("hello");
        buf.push_line("world");
        let out = buf.finish();
        assert!(out.starts_with("hello\nwo"));
        assert!(out.contains("4 more chars dropped"));
    }

    #[test]
    fn test_bounded_buffer_under_cap() {
        let mut buf = BoundedBuffer::new(100);
        buf.push_line("a");
        assert_eq!(buf.finish(), "a\n");
    }
}
