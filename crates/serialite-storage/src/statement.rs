// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting SQL text into individual statements.
//!
//! The engine prepares one statement at a time, so batch text is cut at the
//! first top-level `;`. Semicolons inside string literals, quoted
//! identifiers, comments and `CREATE TRIGGER ... END` bodies do not count.

/// Split `sql` after its first complete statement.
///
/// Returns the first statement (trimmed, including its terminating `;` if
/// any) and the untouched remainder. Text without a terminator is returned
/// whole as the first statement.
pub fn split_first_statement(sql: &str) -> (&str, &str) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut words = WordTracker::default();

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_quoted(bytes, i, bytes[i]);
                words.other();
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                words.other();
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
            }
            b';' => {
                if !words.in_trigger_body() {
                    return (sql[..=i].trim(), &sql[i + 1..]);
                }
                words.semicolon();
                i += 1;
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                words.word(&sql[start..i]);
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                words.other();
                i += 1;
            }
        }
    }

    (sql.trim(), "")
}

/// All non-empty statements in `sql`, in order.
///
/// Fragments consisting only of whitespace, comments or a bare `;` are
/// dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut rest = sql;
    while !rest.trim().is_empty() {
        let (first, tail) = split_first_statement(rest);
        if has_content(first) {
            statements.push(first);
        }
        rest = tail;
    }
    statements
}

/// Whether `sql` contains anything besides whitespace, comments and `;`.
pub fn has_content(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
            }
            b';' => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            _ => return true,
        }
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Index just past the closing `close`, treating a doubled `close` as an
/// escaped character.
fn skip_quoted(bytes: &[u8], open: usize, close: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Tracks the leading keywords of a statement to recognise trigger bodies.
#[derive(Default)]
struct WordTracker {
    /// Number of tokens seen in the current statement, capped.
    seen: u8,
    create: bool,
    trigger: bool,
    /// The previous token was a `;` inside a trigger.
    after_semicolon: bool,
    /// The previous tokens were `;` `END`, closing the trigger body.
    body_closed: bool,
}

impl WordTracker {
    fn word(&mut self, word: &str) {
        let position = self.seen;
        self.seen = self.seen.saturating_add(1);
        self.body_closed = self.after_semicolon && word.eq_ignore_ascii_case("END");
        self.after_semicolon = false;

        match position {
            0 => self.create = word.eq_ignore_ascii_case("CREATE"),
            1 | 2 if self.create && !self.trigger => {
                if word.eq_ignore_ascii_case("TRIGGER") {
                    self.trigger = true;
                } else if !(position == 1
                    && (word.eq_ignore_ascii_case("TEMP")
                        || word.eq_ignore_ascii_case("TEMPORARY")))
                {
                    self.create = false;
                }
            }
            _ => {}
        }
    }

    fn other(&mut self) {
        self.seen = self.seen.saturating_add(1);
        self.after_semicolon = false;
        self.body_closed = false;
    }

    fn semicolon(&mut self) {
        self.other();
        self.after_semicolon = true;
    }

    fn in_trigger_body(&self) -> bool {
        self.trigger && !self.body_closed
    }
}
