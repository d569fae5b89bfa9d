//! Single-line log records queued for delivery.

use std::fmt;

/// Separator substituted for embedded newlines so a record stays on one
/// wire line (U+2028 LINE SEPARATOR).
pub const LINE_SEPARATOR: char = '\u{2028}';

/// An immutable, newline-free UTF-8 log line.
///
/// Construction trims trailing line terminators and replaces every internal
/// `\n` (including the `\r\n` pair) with [`LINE_SEPARATOR`], so one queue
/// entry always maps to exactly one frame on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogLine(String);

impl LogLine {
    /// Normalise a rendered record into a log line.
    pub fn new(rendered: &str) -> Self {
        let trimmed = rendered.trim_end_matches(['\n', '\r']);
        if !trimmed.contains('\n') {
            return Self(trimmed.to_owned());
        }
        let mut line = String::with_capacity(trimmed.len());
        let mut parts = trimmed.split('\n').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                line.push_str(part.strip_suffix('\r').unwrap_or(part));
                line.push(LINE_SEPARATOR);
            } else {
                line.push_str(part);
            }
        }
        Self(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for LogLine {
    fn from(rendered: &str) -> Self {
        Self::new(rendered)
    }
}

impl From<String> for LogLine {
    fn from(rendered: String) -> Self {
        Self::new(&rendered)
    }
}

impl AsRef<str> for LogLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("trailing\n", "trailing")]
    #[case("trailing crlf\r\n", "trailing crlf")]
    #[case("a\nb", "a\u{2028}b")]
    #[case("a\r\nb\nc\n\n", "a\u{2028}b\u{2028}c")]
    #[case("", "")]
    fn normalises_newlines(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(LogLine::new(input).as_str(), expected);
    }

    #[test]
    fn keeps_interior_carriage_returns_without_newline() {
        assert_eq!(LogLine::new("a\rb").as_str(), "a\rb");
    }

    #[test]
    fn never_contains_newline() {
        let line = LogLine::from(String::from("one\ntwo\nthree"));
        assert!(!line.as_str().contains('\n'));
        assert_eq!(line.as_str().matches(LINE_SEPARATOR).count(), 2);
    }
}
