//! Field selectors for body redaction
//!
//! A JSONPath subset covering what redaction rules are written with in
//! practice:
//!
//! | Syntax              | Meaning                                   |
//! |---------------------|-------------------------------------------|
//! | `$`                 | the document root                         |
//! | `.name`, `['name']` | object member                             |
//! | `.*`, `[*]`         | every member of an object or array        |
//! | `[2]`, `[-1]`       | array element (negative counts from end)  |
//! | `..name`, `..*`     | recursive descent                         |
//!
//! Selectors are parsed once, when redaction rules are compiled.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a selector string is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("`{0}` must start with `$`")]
    MissingRoot(String),

    #[error("`{selector}` has an empty segment at offset {offset}")]
    EmptySegment { selector: String, offset: usize },

    #[error("`{selector}` has an unterminated `[` at offset {offset}")]
    UnterminatedBracket { selector: String, offset: usize },

    #[error("`{selector}` has an invalid bracket expression `[{expr}]`")]
    InvalidBracket { selector: String, expr: String },

    #[error("`{selector}` has an unexpected character at offset {offset}")]
    UnexpectedCharacter { selector: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    /// `None` is `..*`
    Descendant(Option<String>),
}

/// A compiled field selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    segments: Vec<Segment>,
}

impl Selector {
    /// Parse a selector expression such as `$.data.items[*].token`
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let selector = source.trim();
        let rest = selector
            .strip_prefix('$')
            .ok_or_else(|| SelectorError::MissingRoot(source.to_string()))?;

        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < rest.len() {
            let tail = &rest[pos..];
            // offsets in errors are relative to the full selector (after `$`)
            let offset = pos + 1;

            if let Some(after) = tail.strip_prefix("..") {
                let name = take_name(after);
                if name.is_empty() {
                    return Err(SelectorError::EmptySegment {
                        selector: selector.to_string(),
                        offset,
                    });
                }
                segments.push(Segment::Descendant((name != "*").then(|| name.to_string())));
                pos += 2 + name.len();
            } else if let Some(after) = tail.strip_prefix('.') {
                let name = take_name(after);
                if name.is_empty() {
                    return Err(SelectorError::EmptySegment {
                        selector: selector.to_string(),
                        offset,
                    });
                }
                segments.push(if name == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Child(name.to_string())
                });
                pos += 1 + name.len();
            } else if let Some(after) = tail.strip_prefix('[') {
                let close = find_close(after).ok_or_else(|| SelectorError::UnterminatedBracket {
                    selector: selector.to_string(),
                    offset,
                })?;
                segments.push(parse_bracket(selector, after[..close].trim())?);
                pos += close + 2;
            } else {
                return Err(SelectorError::UnexpectedCharacter {
                    selector: selector.to_string(),
                    offset,
                });
            }
        }

        Ok(Self {
            source: selector.to_string(),
            segments,
        })
    }

    /// The expression this selector was parsed from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Overwrite every node this selector matches with `replacement`.
    ///
    /// Returns how many nodes were replaced.
    pub fn replace_matches(&self, root: &mut Value, replacement: &Value) -> usize {
        replace_at(root, &self.segments, replacement)
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn take_name(s: &str) -> &str {
    let end = s.find(|c: char| c == '.' || c == '[').unwrap_or(s.len());
    &s[..end]
}

/// Byte offset of the `]` closing a bracket, skipping over quoted names
fn find_close(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_bracket(selector: &str, expr: &str) -> Result<Segment, SelectorError> {
    if expr == "*" {
        return Ok(Segment::Wildcard);
    }

    for quote in ['\'', '"'] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            return Ok(Segment::Child(expr[1..expr.len() - 1].to_string()));
        }
    }

    expr.parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| SelectorError::InvalidBracket {
            selector: selector.to_string(),
            expr: expr.to_string(),
        })
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok().filter(|i| *i < len)
    } else {
        usize::try_from(index.unsigned_abs())
            .ok()
            .and_then(|back| len.checked_sub(back))
    }
}

fn replace_at(node: &mut Value, segments: &[Segment], replacement: &Value) -> usize {
    let Some((head, rest)) = segments.split_first() else {
        *node = replacement.clone();
        return 1;
    };

    match head {
        Segment::Child(name) => match node.as_object_mut().and_then(|map| map.get_mut(name)) {
            Some(child) => replace_at(child, rest, replacement),
            None => 0,
        },
        Segment::Index(index) => match node {
            Value::Array(items) => resolve_index(*index, items.len())
                .and_then(|i| items.get_mut(i))
                .map_or(0, |child| replace_at(child, rest, replacement)),
            _ => 0,
        },
        Segment::Wildcard => match node {
            Value::Object(map) => map
                .values_mut()
                .map(|child| replace_at(child, rest, replacement))
                .sum(),
            Value::Array(items) => items
                .iter_mut()
                .map(|child| replace_at(child, rest, replacement))
                .sum(),
            _ => 0,
        },
        Segment::Descendant(name) => replace_descendants(node, name.as_deref(), rest, replacement),
    }
}

fn replace_descendants(
    node: &mut Value,
    name: Option<&str>,
    rest: &[Segment],
    replacement: &Value,
) -> usize {
    let mut count = 0;
    match node {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if name.map_or(true, |n| n == key) {
                    count += replace_at(child, rest, replacement);
                }
                count += replace_descendants(child, name, rest, replacement);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                if name.is_none() {
                    count += replace_at(child, rest, replacement);
                }
                count += replace_descendants(child, name, rest, replacement);
            }
        }
        _ => {}
    }
    count
}
