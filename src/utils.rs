//! Utility functions for the APIToolkit middleware
//!
//! Helpers for correlation IDs, timestamps, URL rendering and header maps.

use actix_web::http::{header::HeaderMap, Version};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a unique message ID correlating one request/response cycle
pub fn generate_msg_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC time in RFC 3339 format (e.g. "2024-01-15T10:30:00.123456+00:00")
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Path plus `?query` when the query string is non-empty, left as received
pub fn raw_url(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

/// Major and minor protocol numbers of an HTTP version
pub fn proto_version(version: Version) -> (u8, u8) {
    match version {
        Version::HTTP_09 => (0, 9),
        Version::HTTP_10 => (1, 0),
        Version::HTTP_2 => (2, 0),
        Version::HTTP_3 => (3, 0),
        _ => (1, 1),
    }
}

/// Flatten a header map into name → value
///
/// Repeated headers are joined with `", "`. Values that are not valid
/// UTF-8 are decoded lossily rather than dropped.
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

/// Limit captured body bytes to `max_len`
pub fn truncate_body(body: &[u8], max_len: Option<usize>) -> &[u8] {
    match max_len {
        Some(max) if body.len() > max => &body[..max],
        _ => body,
    }
}
