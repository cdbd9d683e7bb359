//! Telemetry records and the payload builder
//!
//! [`TelemetryRecord`] is the fixed-schema message published for every
//! request/response cycle. [`build_payload`] assembles one from an
//! [`Exchange`] without doing any I/O: header sanitizing and body redaction
//! happen here, unconditionally, before anything is encoded.

use actix_web::{
    dev::{ServiceRequest, ServiceResponse},
    web::{self, Bytes},
    HttpRequest,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use crate::redact::{redact_fields, redact_headers, RedactionRules};
use crate::utils::{current_timestamp, headers_to_map, proto_version, raw_url, truncate_body};

/// Identifies this integration in every record
pub const SDK_TYPE: &str = "RustActix";

/// Status reported when the handler never produced a response
pub const DEFAULT_STATUS_CODE: u16 = 200;

/// One request/response cycle, as published to APIToolkit
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub request_headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub method: String,
    pub sdk_type: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    /// `scheme://authority`
    pub host: String,
    /// Path plus raw query string
    pub raw_url: String,
    pub referer: String,
    pub project_id: String,
    /// Matched route template, or the literal path when routing did not match
    pub url_path: String,
    /// Redacted, base64-encoded
    pub response_body: String,
    /// Redacted, base64-encoded
    pub request_body: String,
    pub status_code: u16,
    /// Nanoseconds
    pub duration: u64,
    pub timestamp: String,
    pub service_version: Option<String>,
    pub tags: Vec<String>,
    pub msg_id: String,
    pub errors: Vec<ErrorDescriptor>,
    pub parent_id: Option<String>,
}

/// An error observed while handling a request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDescriptor {
    pub when: String,
    pub error_type: String,
    pub root_error_type: String,
    pub message: String,
    pub root_error_message: String,
    pub stack_trace: String,
}

impl ErrorDescriptor {
    /// Describe an error known only by its message
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            when: current_timestamp(),
            error_type: "Error".to_string(),
            root_error_type: "Error".to_string(),
            root_error_message: message.clone(),
            message,
            stack_trace: String::new(),
        }
    }

    /// Describe any error, following its `source()` chain to the root cause
    pub fn from_error<E: StdError + 'static>(err: &E) -> Self {
        let mut root: &(dyn StdError + 'static) = err;
        while let Some(source) = root.source() {
            root = source;
        }

        let error_type = std::any::type_name::<E>().to_string();
        let root_error_type = if err.source().is_none() {
            error_type.clone()
        } else {
            debug_type_name(root)
        };

        Self {
            when: current_timestamp(),
            error_type,
            root_error_type,
            message: err.to_string(),
            root_error_message: root.to_string(),
            stack_trace: stack_trace(err),
        }
    }

    /// Describe an error produced by an Actix handler or middleware
    pub fn from_actix(err: &actix_web::Error) -> Self {
        let status = err.as_response_error().status_code();
        Self {
            when: current_timestamp(),
            error_type: "actix_web::Error".to_string(),
            root_error_type: format!("HTTP {}", status.as_u16()),
            message: err.to_string(),
            root_error_message: err.to_string(),
            stack_trace: stack_trace(err),
        }
    }
}

/// Leading identifier of an error's `Debug` output, e.g. `ParseIntError`
fn debug_type_name(err: &dyn StdError) -> String {
    let rendered = format!("{:?}", err);
    let name: String = rendered
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

fn stack_trace(err: &dyn std::fmt::Debug) -> String {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => format!("{:?}\n{}", err, backtrace),
        _ => format!("{:?}", err),
    }
}

/// Request metadata captured before the handler runs
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: String,
    /// `scheme://authority`
    pub host: String,
    pub path: String,
    pub query_string: String,
    pub route_pattern: Option<String>,
    pub path_params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub proto: (u8, u8),
}

impl RequestSnapshot {
    pub fn capture(req: &ServiceRequest) -> Self {
        let host = {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        };

        Self {
            method: req.method().to_string(),
            host,
            path: req.path().to_string(),
            query_string: req.query_string().to_string(),
            // resolvable before routing; path params are not
            route_pattern: req.match_pattern(),
            path_params: HashMap::new(),
            headers: headers_to_map(req.headers()),
            proto: proto_version(req.version()),
        }
    }

    /// Pick up the route template and path parameters once routing has run
    pub fn update_route(&mut self, req: &HttpRequest) {
        if let Some(pattern) = req.match_pattern() {
            self.route_pattern = Some(pattern);
        }
        let params: HashMap<String, String> = req
            .match_info()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        if !params.is_empty() {
            self.path_params = params;
        }
    }
}

/// Response metadata captured after the handler completes
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl ResponseSnapshot {
    pub fn capture<B>(res: &ServiceResponse<B>) -> Self {
        Self {
            status: res.status().as_u16(),
            headers: headers_to_map(res.headers()),
        }
    }
}

/// Everything observed during one request/response cycle
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub msg_id: String,
    pub request: RequestSnapshot,
    /// `None` when the handler failed before producing a response
    pub response: Option<ResponseSnapshot>,
    pub request_body: Bytes,
    pub response_body: Bytes,
    pub duration: Duration,
    pub errors: Vec<ErrorDescriptor>,
}

/// Per-process values stamped onto every record
#[derive(Debug, Clone, Default)]
pub struct PayloadSettings {
    pub project_id: String,
    pub service_version: Option<String>,
    pub tags: Vec<String>,
    pub max_body_size: Option<usize>,
}

/// Assemble the record for one exchange
pub fn build_payload(
    exchange: &Exchange,
    rules: &RedactionRules,
    settings: &PayloadSettings,
) -> TelemetryRecord {
    let request = &exchange.request;
    let (status_code, response_headers) = match &exchange.response {
        Some(response) => (response.status, redact_headers(&response.headers, &rules.headers)),
        None => (DEFAULT_STATUS_CODE, HashMap::new()),
    };
    let request_headers = redact_headers(&request.headers, &rules.headers);

    let request_body = redact_fields(&exchange.request_body, &rules.request_body);
    let response_body = redact_fields(&exchange.response_body, &rules.response_body);

    let query_params = web::Query::<HashMap<String, String>>::from_query(&request.query_string)
        .map(web::Query::into_inner)
        .unwrap_or_default();

    TelemetryRecord {
        referer: request_headers.get("referer").cloned().unwrap_or_default(),
        request_headers,
        query_params,
        path_params: request.path_params.clone(),
        response_headers,
        method: request.method.clone(),
        sdk_type: SDK_TYPE.to_string(),
        proto_major: request.proto.0,
        proto_minor: request.proto.1,
        host: request.host.clone(),
        raw_url: raw_url(&request.path, &request.query_string),
        project_id: settings.project_id.clone(),
        url_path: request
            .route_pattern
            .clone()
            .unwrap_or_else(|| request.path.clone()),
        response_body: STANDARD.encode(truncate_body(&response_body, settings.max_body_size)),
        request_body: STANDARD.encode(truncate_body(&request_body, settings.max_body_size)),
        status_code,
        duration: u64::try_from(exchange.duration.as_nanos()).unwrap_or(u64::MAX),
        timestamp: current_timestamp(),
        service_version: settings.service_version.clone(),
        tags: settings.tags.clone(),
        msg_id: exchange.msg_id.clone(),
        errors: exchange.errors.clone(),
        parent_id: None,
    }
}
