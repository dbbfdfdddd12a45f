//! Syntactic repair of malformed JSON produced by a model.
//!
//! No network calls happen here. The input is stripped of markdown fences
//! and surrounding prose, then read by a lenient parser that accepts what
//! models commonly get wrong:
//!
//! - unquoted keys and bare-word string values (`{title: Foo}`)
//! - single-quoted strings
//! - trailing, missing or doubled commas
//! - `//`, `/* */` comments
//! - Python literals (`True`, `False`, `None`)
//! - truncation: open strings and containers are closed
//!
//! Text that is already valid JSON is returned exactly as `serde_json`
//! parses it.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepairError {
    #[error("output was empty")]
    Empty,

    #[error("no JSON object or array found in output")]
    NoJson,

    #[error("repaired JSON does not match the expected shape: {0}")]
    Validation(String),

    #[error("JSON nesting exceeds 128 levels")]
    TooDeep,
}

/// Nesting limit for the lenient parser; the same limit `serde_json` applies.
pub const MAX_DEPTH: usize = 128;

/// Remove a surrounding markdown code fence, with or without a language tag.
///
/// A fence opened but never closed (truncated output) keeps everything after
/// the opening line.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_open = &trimmed[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];

    match body.rfind("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Repair `text` into a JSON value.
pub fn repair_json(text: &str) -> Result<Value, RepairError> {
    let stripped = strip_code_fences(text);
    if stripped.is_empty() {
        return Err(RepairError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }

    let start = stripped.find(['{', '[']).ok_or(RepairError::NoJson)?;
    let chars: Vec<char> = stripped[start..].chars().collect();
    let mut parser = Lenient { chars: &chars, pos: 0, depth: 0 };
    parser.value(Scope::Top)
}

/// Repair `text` and deserialize it into `T`.
pub fn repair_into<T: DeserializeOwned>(text: &str) -> Result<T, RepairError> {
    let value = repair_json(text)?;
    serde_json::from_value(value).map_err(|e| RepairError::Validation(e.to_string()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    Object,
    Array,
}

struct Lenient<'a> {
    chars: &'a [char],
    pos: usize,
    depth: usize,
}

impl Lenient<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else if c == '/' && self.peek_at(1) == Some('*') {
                self.pos += 2;
                while self.peek().is_some() && !(self.peek() == Some('*') && self.peek_at(1) == Some('/')) {
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.chars.len());
            } else {
                break;
            }
        }
    }

    fn value(&mut self, scope: Scope) -> Result<Value, RepairError> {
        self.skip_trivia();
        let value = match self.peek() {
            None => Value::Null,
            Some('{') => self.nested(Self::object)?,
            Some('[') => self.nested(Self::array)?,
            Some(q @ ('"' | '\'')) => Value::String(self.string(q)),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number_or_bare(scope),
            Some(_) => self.bare_value(),
        };
        Ok(value)
    }

    fn nested(
        &mut self,
        container: fn(&mut Self) -> Result<Value, RepairError>,
    ) -> Result<Value, RepairError> {
        if self.depth >= MAX_DEPTH {
            return Err(RepairError::TooDeep);
        }
        self.depth += 1;
        let value = container(self);
        self.depth -= 1;
        value
    }

    fn object(&mut self) -> Result<Value, RepairError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Ok(Value::Object(map)),
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                // Mismatched closer: end here and let the parent consume it
                Some(']') => return Ok(Value::Object(map)),
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let key = match self.peek() {
                Some(q @ ('"' | '\'')) => self.string(q),
                _ => self.bare_key(),
            };
            if key.is_empty() {
                // Unusable character in key position
                self.pos += 1;
                continue;
            }

            self.skip_trivia();
            if matches!(self.peek(), Some(':' | '=')) {
                self.pos += 1;
            }
            self.skip_trivia();

            let value = match self.peek() {
                None | Some(',' | '}') => Value::Null,
                _ => self.value(Scope::Object)?,
            };
            map.insert(key, value);
        }
    }

    fn array(&mut self) -> Result<Value, RepairError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Ok(Value::Array(items)),
                Some(']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some('}') => return Ok(Value::Array(items)),
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let before = self.pos;
            items.push(self.value(Scope::Array)?);
            if self.pos == before {
                self.pos += 1;
            }
        }
    }

    /// A quoted string; an unterminated one ends at end of input.
    fn string(&mut self, quote: char) -> String {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == quote {
                return out;
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some(esc) = self.peek() else { break };
            self.pos += 1;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => {
                    let hex: String = self.chars[self.pos..].iter().take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 4 => {
                            out.push(ch);
                            self.pos += 4;
                        }
                        _ => out.push_str("\\u"),
                    }
                }
                other => out.push(other),
            }
        }
        out
    }

    fn bare_key(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ':' || c == '=' || c.is_whitespace() || ",{}[]\"'".contains(c) {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// A bare word value: everything up to the next delimiter or line end.
    fn bare_value(&mut self) -> Value {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '}' | ']' | '\n') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            self.pos += 1;
            return Value::Null;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        interpret_bare(word.trim())
    }

    fn number_or_bare(&mut self, scope: Scope) -> Value {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        let end = self.pos;

        self.skip_trivia();
        let next = self.peek();
        let saw_newline = self.chars[end..self.pos].contains(&'\n');
        let delimited = match next {
            None | Some(',' | '}' | ']' | '"' | '\'') => true,
            _ => saw_newline || scope == Scope::Array,
        };
        self.pos = end;

        match parse_number(&literal) {
            Some(n) if delimited => Value::Number(n),
            _ => {
                self.pos = start;
                self.bare_value()
            }
        }
    }
}

fn parse_number(literal: &str) -> Option<Number> {
    if let Ok(i) = literal.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = literal.parse::<u64>() {
        return Some(Number::from(u));
    }
    literal.parse::<f64>().ok().and_then(Number::from_f64)
}

fn interpret_bare(word: &str) -> Value {
    match word {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        "null" | "None" | "NULL" | "nil" | "undefined" | "NaN" => Value::Null,
        _ => match parse_number(word) {
            Some(n) => Value::Number(n),
            None => Value::String(word.to_string()),
        },
    }
}
