//! Recovery of JSON from malformed model output.
//!
//! Each transform is a pure `&str -> String` function with one job. They are
//! applied cumulatively in a fixed order by [`parse_with_repair`], which
//! re-attempts a strict parse after every step:
//!
//! 1. [`normalize_quotes`]: single-quoted (and curly-quoted) strings become
//!    double-quoted.
//! 2. [`insert_missing_separators`]: `}{`, `][`, `} "key"` and friends get
//!    their missing comma.
//! 3. [`balance_brackets`]: unterminated strings and containers are closed.
//! 4. [`extract_first_object`]: prose around the first `{...}` span is cut
//!    away, then steps 1–3 are replayed on the span.
//!
//! No transform ever removes or reorders a structural token.

use serde_json::Value;
use tracing::debug;

use docmodules_shared::{DocModulesError, Result};

/// The step whose output first parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStep {
    /// The raw text was already valid.
    Strict,
    NormalizeQuotes,
    InsertSeparators,
    BalanceBrackets,
    ExtractObject,
}

impl RepairStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::NormalizeQuotes => "normalize_quotes",
            Self::InsertSeparators => "insert_separators",
            Self::BalanceBrackets => "balance_brackets",
            Self::ExtractObject => "extract_object",
        }
    }
}

/// A successfully parsed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub value: Value,
    pub step: RepairStep,
}

/// Parse model output as a JSON object or array, repairing it if needed.
///
/// Returns a [`DocModulesError::Parse`] when every repair attempt fails.
pub fn parse_with_repair(raw: &str) -> Result<Repaired> {
    if let Some(value) = try_parse(raw) {
        return Ok(Repaired {
            value,
            step: RepairStep::Strict,
        });
    }

    let attempt = |text: &str, step: RepairStep| -> Option<Repaired> {
        let quoted = normalize_quotes(text);
        if let Some(value) = try_parse(&quoted) {
            return Some(Repaired { value, step });
        }
        let separated = insert_missing_separators(&quoted);
        if let Some(value) = try_parse(&separated) {
            return Some(Repaired { value, step });
        }
        let balanced = balance_brackets(&separated);
        try_parse(&balanced).map(|value| Repaired { value, step })
    };

    // Steps 1-3 on the whole response, reporting the step that succeeded.
    let quoted = normalize_quotes(raw);
    if let Some(value) = try_parse(&quoted) {
        return Ok(Repaired {
            value,
            step: RepairStep::NormalizeQuotes,
        });
    }
    let separated = insert_missing_separators(&quoted);
    if let Some(value) = try_parse(&separated) {
        return Ok(Repaired {
            value,
            step: RepairStep::InsertSeparators,
        });
    }
    let balanced = balance_brackets(&separated);
    if let Some(value) = try_parse(&balanced) {
        return Ok(Repaired {
            value,
            step: RepairStep::BalanceBrackets,
        });
    }

    // Step 4: isolate the first object and replay 1-3 on it.
    if let Some(span) = extract_first_object(raw) {
        debug!(span_len = span.len(), raw_len = raw.len(), "retrying on first object span");
        if let Some(value) = try_parse(span) {
            return Ok(Repaired {
                value,
                step: RepairStep::ExtractObject,
            });
        }
        if let Some(repaired) = attempt(span, RepairStep::ExtractObject) {
            return Ok(repaired);
        }
    }

    Err(DocModulesError::parse(format!(
        "unrecoverable model output ({} chars): {}",
        raw.chars().count(),
        snippet(raw)
    )))
}

/// Strict parse, accepting only objects and arrays.
fn try_parse(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn snippet(raw: &str) -> String {
    const MAX: usize = 120;
    let flat: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        format!("{}…", flat.chars().take(MAX).collect::<String>())
    }
}

// ---------------------------------------------------------------------------
// 1. Quotes
// ---------------------------------------------------------------------------

/// Convert single-quoted strings (and curly-quoted ones) to double-quoted.
///
/// A `'` opens a string only where a JSON string may start (after `{ [ , :`
/// or at the beginning) and closes only where one may end (before
/// `: , } ]` or the end of input), so apostrophes inside the text survive.
/// Content of existing double-quoted strings is never touched.
pub fn normalize_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\u{201C}' {
            i = copy_double_quoted(&chars, i, &mut out);
            continue;
        }

        if (c == '\'' || c == '\u{2018}') && can_open_string(&out) {
            if let Some(end) = find_single_quote_close(&chars, i + 1) {
                out.push('"');
                let mut k = i + 1;
                while k < end {
                    let ch = chars[k];
                    match ch {
                        '\\' if k + 1 < end && chars[k + 1] == '\'' => {
                            out.push('\'');
                            k += 2;
                            continue;
                        }
                        '\\' if k + 1 < end => {
                            out.push('\\');
                            out.push(chars[k + 1]);
                            k += 2;
                            continue;
                        }
                        '"' => out.push_str("\\\""),
                        _ => out.push(ch),
                    }
                    k += 1;
                }
                out.push('"');
                i = end + 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Copy a double-quoted string starting at `start`; returns the index after it.
///
/// A string opened by a curly quote may be closed by a straight or curly one;
/// both delimiters are written as `"`.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    let curly = chars[start] == '\u{201C}';
    out.push('"');
    let mut i = start + 1;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];
        if escaped {
            escaped = false;
            out.push(c);
        } else if c == '\\' {
            escaped = true;
            out.push(c);
        } else if c == '"' || (curly && c == '\u{201D}') {
            out.push('"');
            return i + 1;
        } else if curly && c == '\u{201C}' {
            out.push_str("\\\"");
        } else {
            out.push(c);
        }
        i += 1;
    }
    i
}

fn can_open_string(out: &str) -> bool {
    matches!(
        out.chars().rev().find(|c| !c.is_whitespace()),
        None | Some('{' | '[' | ',' | ':')
    )
}

/// Index of the quote closing a single-quoted string whose content starts at `from`.
fn find_single_quote_close(chars: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\'' | '\u{2019}' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, None | Some(':' | ',' | '}' | ']')) {
                    return Some(i);
                }
                i += 1;
            }
            '\n' => return None,
            _ => i += 1,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// 2. Separators
// ---------------------------------------------------------------------------

/// Insert commas between adjacent values that lack one.
///
/// Inside a container, a `{`/`[` directly after a closed value, or a string
/// directly after a closed value or another string, gets a comma. Two
/// top-level values side by side (`{"A":{}}{"B":{}}`) are separated and the
/// whole text is wrapped in `[...]` so they become array elements.
pub fn insert_missing_separators(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last: Option<char> = None;
    let mut wrap = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last = Some('"');
            }
            continue;
        }

        match c {
            '{' | '[' => {
                if matches!(last, Some('}' | ']')) {
                    if depth == 0 {
                        wrap = true;
                    }
                    out.push(',');
                }
                out.push(c);
                depth += 1;
                last = Some(c);
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                out.push(c);
                last = Some(c);
            }
            '"' => {
                let after_value = matches!(last, Some('}' | ']' | '"'))
                    || last.is_some_and(|l| l.is_ascii_alphanumeric());
                if depth > 0 && after_value {
                    out.push(',');
                }
                out.push(c);
                in_string = true;
            }
            c if c.is_whitespace() => out.push(c),
            c => {
                out.push(c);
                last = Some(c);
            }
        }
    }

    if wrap { format!("[{out}]") } else { out }
}

// ---------------------------------------------------------------------------
// 3. Brackets
// ---------------------------------------------------------------------------

/// Append the closers needed to terminate every open string and container.
///
/// Closers are appended innermost first; nothing is removed or reordered, and
/// stray closers are left as they are.
pub fn balance_brackets(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        if escaped {
            out.push('\\');
        }
        out.push('"');
    }
    out.extend(stack.iter().rev());
    out
}

// ---------------------------------------------------------------------------
// 4. Prose
// ---------------------------------------------------------------------------

/// The first balanced `{...}` span in `text`.
///
/// Braces inside double-quoted strings do not count. If the object never
/// closes, the span runs to the end of the text so that
/// [`balance_brackets`] can finish it.
pub fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Some(&text[start..])
}
