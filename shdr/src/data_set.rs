//! Hand-written scanner for data-set and table value text.
//!
//! Grammar (whitespace-separated entries, after an optional leading
//! `:TRIGGER` reset marker):
//!
//! ```text
//! entry := KEY            -- removal
//!        | KEY '='        -- removal
//!        | KEY '=' value
//! value := bare word | '"'…'"' | '\''…'\'' | '{'…'}'
//! ```
//!
//! For tables every top-level value must be delimited and is scanned
//! recursively as a row of cells. A backslash escapes the character after
//! it. An unterminated delimiter fails the parse but the entries completed
//! before the failing one are retained on the error.

use observation::{DataSet, DataSetEntry, Value};
use snafu::Snafu;

/// A successfully scanned data set plus the optional reset trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSet {
    pub entries: DataSet,
    pub reset_triggered: Option<String>,
}

/// Scan failures. Entries completed before the failure are carried on the
/// error so the caller can keep them, as the adapters expect.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum DataSetError {
    #[snafu(display("value for {:?} not terminated by {:?}", key, delimiter))]
    Unterminated {
        key: String,
        delimiter: char,
        parsed: ParsedSet,
    },

    #[snafu(display("table entry {:?} requires a braced or quoted row", key))]
    ScalarRow { key: String, parsed: ParsedSet },
}

impl DataSetError {
    /// The entries scanned before the failure.
    pub fn parsed(&self) -> &ParsedSet {
        match self {
            Self::Unterminated { parsed, .. } | Self::ScalarRow { parsed, .. } => parsed,
        }
    }

    pub fn into_parsed(self) -> ParsedSet {
        match self {
            Self::Unterminated { parsed, .. } | Self::ScalarRow { parsed, .. } => parsed,
        }
    }
}

/// Parses data-set text: entry values are scalars.
pub fn parse_data_set(input: &str) -> Result<ParsedSet, DataSetError> {
    parse(input, false)
}

/// Parses table text: every entry value is a delimited row of cells.
pub fn parse_table(input: &str) -> Result<ParsedSet, DataSetError> {
    parse(input, true)
}

fn parse(input: &str, table: bool) -> Result<ParsedSet, DataSetError> {
    let mut scanner = Scanner::new(input.trim());
    let reset_triggered = scanner.take_reset_trigger();

    let mut entries = DataSet::new();
    match parse_entries(&mut scanner, None, table, &mut entries) {
        Ok(()) => Ok(ParsedSet {
            entries,
            reset_triggered,
        }),
        Err(kind) => {
            let parsed = ParsedSet {
                entries,
                reset_triggered,
            };
            Err(match kind {
                ErrKind::Unterminated { key, delimiter } => DataSetError::Unterminated {
                    key,
                    delimiter,
                    parsed,
                },
                ErrKind::ScalarRow { key } => DataSetError::ScalarRow { key, parsed },
            })
        }
    }
}

#[derive(Debug)]
enum ErrKind {
    Unterminated { key: String, delimiter: char },
    ScalarRow { key: String },
}

/// Scans entries until `terminator` (or end of input when `None`),
/// inserting completed entries into `out` as it goes.
fn parse_entries(
    scanner: &mut Scanner,
    terminator: Option<char>,
    table: bool,
    out: &mut DataSet,
) -> Result<(), ErrKind> {
    loop {
        scanner.skip_whitespace();
        match scanner.peek() {
            None => {
                return match terminator {
                    Some(delimiter) => Err(ErrKind::Unterminated {
                        key: String::new(),
                        delimiter,
                    }),
                    None => Ok(()),
                };
            }
            Some(c) if Some(c) == terminator => {
                scanner.bump();
                return Ok(());
            }
            Some(_) => parse_entry(scanner, terminator, table, out)?,
        }
    }
}

fn parse_entry(
    scanner: &mut Scanner,
    terminator: Option<char>,
    table: bool,
    out: &mut DataSet,
) -> Result<(), ErrKind> {
    let key = scanner.scan_key(terminator);
    if key.is_empty() {
        // a stray character that cannot start a key; skip it
        scanner.bump();
        return Ok(());
    }

    if scanner.peek() != Some('=') {
        out.insert(key, DataSetEntry::removed());
        return Ok(());
    }
    scanner.bump();

    match scanner.peek() {
        // `KEY=` with nothing following is a removal, same as a bare key
        None => out.insert(key, DataSetEntry::removed()),
        // an opening delimiter wins over a closing one: inside a quoted
        // row, `c='abc'` starts a value rather than ending the row
        Some(open @ ('{' | '\'' | '"')) => {
            scanner.bump();
            let close = if open == '{' { '}' } else { open };
            if table {
                let mut row = DataSet::new();
                parse_entries(scanner, Some(close), false, &mut row).map_err(|kind| {
                    match kind {
                        ErrKind::Unterminated { delimiter, .. } => ErrKind::Unterminated {
                            key: key.clone(),
                            delimiter,
                        },
                        other => other,
                    }
                })?;
                out.insert(key, DataSetEntry::new(Value::DataSet(row)));
            } else {
                let text = scanner
                    .scan_delimited(close)
                    .ok_or_else(|| ErrKind::Unterminated {
                        key: key.clone(),
                        delimiter: close,
                    })?;
                out.insert(key, DataSetEntry::new(Value::Text(text)));
            }
        }
        Some(c) if c.is_whitespace() || Some(c) == terminator => {
            out.insert(key, DataSetEntry::removed());
        }
        Some(_) => {
            let word = scanner.scan_bare(terminator);
            if table {
                return Err(ErrKind::ScalarRow { key });
            }
            out.insert(key, DataSetEntry::new(Value::from_token(&word)));
        }
    }

    Ok(())
}

#[derive(Debug)]
struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// A leading `:TRIGGER` (only at the very start of the text) names the
    /// reset trigger; the rest of the text is the data set proper.
    fn take_reset_trigger(&mut self) -> Option<String> {
        if self.peek() != Some(':') {
            return None;
        }

        let mut end = self.pos + 1;
        while matches!(self.chars.get(end), Some(c) if !c.is_whitespace()) {
            end += 1;
        }
        let trigger: String = self.chars[self.pos + 1..end].iter().collect();
        if trigger.is_empty() {
            return None;
        }

        self.pos = end;
        Some(trigger)
    }

    /// Key characters run to the next `=`, whitespace, terminator, or end.
    fn scan_key(&mut self, terminator: Option<char>) -> String {
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if c == '=' || c.is_whitespace() || Some(c) == terminator {
                break;
            }
            key.push(c);
            self.pos += 1;
        }
        key
    }

    /// A bare word runs to the next whitespace, terminator, or end. A
    /// backslash escapes the character after it.
    fn scan_bare(&mut self, terminator: Option<char>) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || Some(c) == terminator {
                break;
            }
            self.pos += 1;
            if c == '\\' {
                if let Some(escaped) = self.bump() {
                    word.push(escaped);
                }
            } else {
                word.push(c);
            }
        }
        word
    }

    /// Scans to the matching unescaped `close`, returning the unescaped
    /// content, or `None` when the input ends first.
    fn scan_delimited(&mut self, close: char) -> Option<String> {
        let mut text = String::new();
        loop {
            let c = self.bump()?;
            if c == close {
                return Some(text);
            }
            if c == '\\' {
                text.push(self.bump()?);
            } else {
                text.push(c);
            }
        }
    }
}

/// Renders a data set (or table, when rows are [`Value::DataSet`]) back to
/// its wire form. Parsing the result reproduces the input set.
pub fn serialize_data_set(set: &DataSet) -> String {
    let mut out = String::new();
    for (key, entry) in set {
        if !out.is_empty() {
            out.push(' ');
        }
        if entry.removed {
            out.push_str(key);
            continue;
        }
        out.push_str(key);
        out.push('=');
        match &entry.value {
            Value::Integer(i) => out.push_str(&i.to_string()),
            Value::Double(d) => out.push_str(&format!("{d:?}")),
            Value::Text(s) => {
                if needs_quoting(s) {
                    out.push('{');
                    for c in s.chars() {
                        if c == '}' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('}');
                } else {
                    out.push_str(s);
                }
            }
            Value::DataSet(row) => {
                out.push('{');
                out.push_str(&serialize_data_set(row));
                out.push('}');
            }
        }
    }
    out
}

/// Text must be delimited when bare re-parsing would change it: special
/// characters, embedded whitespace, emptiness, or text that would re-type
/// as a number.
fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '\'' | '"' | '\\' | '|'))
        || !matches!(Value::from_token(s), Value::Text(_))
}
