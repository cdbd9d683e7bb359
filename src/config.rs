//! Configuration management for the APIToolkit middleware
//!
//! A [`Config`] is built once at startup, either explicitly with
//! [`Config::new`] and the chained setters, or from environment variables
//! with [`Config::from_env`]. It is consumed by [`crate::Client::new`].

use crate::error::ToolkitError;

/// Default APIToolkit endpoint used for the metadata handshake
pub const DEFAULT_ROOT_URL: &str = "https://app.apitoolkit.io";

/// Headers redacted when none are configured
pub const DEFAULT_REDACT_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// Configuration for the APIToolkit client
///
/// Environment variables read by [`Config::from_env`]:
/// - `APITOOLKIT_KEY`: API key (required)
/// - `APITOOLKIT_ROOT_URL`: override for [`DEFAULT_ROOT_URL`]
/// - `APITOOLKIT_DEBUG`: "true"/"1"/"yes" enables verbose SDK output
/// - `APITOOLKIT_REDACT_HEADERS`, `APITOOLKIT_REDACT_REQUEST_BODY`,
///   `APITOOLKIT_REDACT_RESPONSE_BODY`: comma-separated lists
/// - `APITOOLKIT_SERVICE_VERSION`, `APITOOLKIT_TAGS` (comma-separated)
/// - `APITOOLKIT_MAX_BODY_SIZE`: byte limit for captured bodies
#[derive(Debug, Clone)]
pub struct Config {
    /// API key sent as a bearer token during the handshake
    pub api_key: String,

    /// Base URL of the APIToolkit server
    pub root_url: String,

    /// Log lifecycle events and every published record
    pub debug: bool,

    /// Header names (case-insensitive) redacted on both requests and responses
    pub redact_headers: Vec<String>,

    /// Selectors redacted from request bodies
    pub redact_request_body: Vec<String>,

    /// Selectors redacted from response bodies
    pub redact_response_body: Vec<String>,

    pub service_version: Option<String>,

    pub tags: Vec<String>,

    /// Captured bodies longer than this are truncated after redaction.
    /// `None` captures bodies whole. Never affects what the handler or
    /// the caller receive.
    pub max_body_size: Option<usize>,
}

impl Config {
    /// Create a configuration with defaults for everything but the API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            root_url: DEFAULT_ROOT_URL.to_string(),
            debug: false,
            redact_headers: DEFAULT_REDACT_HEADERS.iter().map(|h| h.to_string()).collect(),
            redact_request_body: Vec::new(),
            redact_response_body: Vec::new(),
            service_version: None,
            tags: Vec::new(),
            max_body_size: None,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Fails only when `APITOOLKIT_KEY` is missing or empty; every other
    /// variable falls back to its default.
    pub fn from_env() -> Result<Self, ToolkitError> {
        let api_key = std::env::var("APITOOLKIT_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ToolkitError::MissingConfig)?;

        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("APITOOLKIT_ROOT_URL") {
            config.root_url = url;
        }

        config.debug = match std::env::var("APITOOLKIT_DEBUG") {
            Ok(val) => matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"),
            Err(_) => false,
        };

        if let Some(headers) = env_list("APITOOLKIT_REDACT_HEADERS") {
            config.redact_headers = headers;
        }
        if let Some(paths) = env_list("APITOOLKIT_REDACT_REQUEST_BODY") {
            config.redact_request_body = paths;
        }
        if let Some(paths) = env_list("APITOOLKIT_REDACT_RESPONSE_BODY") {
            config.redact_response_body = paths;
        }
        if let Some(tags) = env_list("APITOOLKIT_TAGS") {
            config.tags = tags;
        }

        config.service_version = std::env::var("APITOOLKIT_SERVICE_VERSION")
            .ok()
            .filter(|v| !v.is_empty());

        config.max_body_size = match std::env::var("APITOOLKIT_MAX_BODY_SIZE") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(size) => Some(size),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparsable APITOOLKIT_MAX_BODY_SIZE");
                    None
                }
            },
            Err(_) => None,
        };

        Ok(config)
    }

    pub fn root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Replace the redacted header names (the defaults are dropped)
    pub fn redact_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redact_headers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn redact_request_body<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redact_request_body = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn redact_response_body<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redact_response_body = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = Some(limit);
        self
    }

    /// URL of the client metadata endpoint
    pub fn metadata_url(&self) -> String {
        format!("{}/api/client_metadata", self.root_url.trim_end_matches('/'))
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect(),
    )
}
