//! Redaction of sensitive headers and body fields
//!
//! Redaction is irreversible: matched values are replaced by
//! [`REDACTED`] before a record ever leaves the process. Bodies that are not
//! JSON pass through byte-for-byte.

use serde_json::Value;
use std::collections::HashMap;

use crate::config::Config;
use crate::selector::{Selector, SelectorError};

/// Sentinel written over every redacted value
pub const REDACTED: &str = "[CLIENT_REDACTED]";

/// Redaction rules compiled from [`Config`]
#[derive(Debug, Clone, Default)]
pub struct RedactionRules {
    /// Header names, lowercased
    pub headers: Vec<String>,
    pub request_body: Vec<Selector>,
    pub response_body: Vec<Selector>,
}

impl RedactionRules {
    /// Compile the configured selectors, rejecting any that do not parse
    pub fn compile(config: &Config) -> Result<Self, SelectorError> {
        Ok(Self {
            headers: config
                .redact_headers
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            request_body: compile_selectors(&config.redact_request_body)?,
            response_body: compile_selectors(&config.redact_response_body)?,
        })
    }
}

fn compile_selectors(exprs: &[String]) -> Result<Vec<Selector>, SelectorError> {
    exprs.iter().map(|expr| Selector::parse(expr)).collect()
}

/// Replace the values of the named headers with [`REDACTED`]
///
/// Names compare case-insensitively; the returned map keeps the original
/// header names as keys.
pub fn redact_headers(
    headers: &HashMap<String, String>,
    names: &[String],
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// Overwrite every field matched by `selectors` with [`REDACTED`]
///
/// Returns `body` unchanged when it is not valid JSON or when no selector
/// matches anything.
pub fn redact_fields(body: &[u8], selectors: &[Selector]) -> Vec<u8> {
    if selectors.is_empty() {
        return body.to_vec();
    }

    let mut document: Value = match serde_json::from_slice(body) {
        Ok(document) => document,
        Err(_) => return body.to_vec(),
    };

    let sentinel = Value::String(REDACTED.to_string());
    let replaced: usize = selectors
        .iter()
        .map(|selector| selector.replace_matches(&mut document, &sentinel))
        .sum();

    if replaced == 0 {
        return body.to_vec();
    }

    match serde_json::to_vec(&document) {
        Ok(bytes) => bytes,
        Err(e) => {
            // Unreachable for a Value we just parsed; drop the body rather than leak it.
            tracing::warn!(error = %e, "failed to re-serialize redacted body");
            Vec::new()
        }
    }
}
