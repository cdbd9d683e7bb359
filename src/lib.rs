//! # APIToolkit Actix SDK
//!
//! Request/response observability middleware for Actix-Web applications.
//!
//! Every request passing through the middleware is turned into a telemetry
//! record (method, route, headers, bodies, status, latency, errors) and
//! published in the background to the APIToolkit ingestion topic. It's
//! designed with these principles:
//!
//! - **Transparent**: handlers and clients see exactly the bytes that were sent
//! - **Non-blocking**: records are published from background tasks
//! - **Fail-safe**: an unreachable backend disables publishing, never the app
//! - **Private**: configured headers and JSON body fields are redacted before
//!   anything leaves the process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpResponse, HttpServer};
//! use apitoolkit_actix::{ApiToolkit, Config};
//!
//! #[actix_web::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("<API_KEY>")
//!         .redact_headers(["authorization", "x-api-key"])
//!         .redact_request_body(["$.password", "$.card.number"]);
//!     let apitoolkit = ApiToolkit::new(config).await?;
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(apitoolkit.clone())
//!             .service(web::resource("/").to(|| async { HttpResponse::Ok().body("Hello!") }))
//!     })
//!     .bind("0.0.0.0:8080")?
//!     .run()
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Either build a [`Config`] in code or load it with [`Config::from_env`]:
//!
//! - `APITOOLKIT_KEY`: project API key (required)
//! - `APITOOLKIT_ROOT_URL`: backend base URL
//! - `APITOOLKIT_DEBUG`: log records and lifecycle events
//! - `APITOOLKIT_REDACT_HEADERS`, `APITOOLKIT_REDACT_REQUEST_BODY`,
//!   `APITOOLKIT_REDACT_RESPONSE_BODY`: comma-separated lists
//! - `APITOOLKIT_SERVICE_VERSION`, `APITOOLKIT_TAGS`, `APITOOLKIT_MAX_BODY_SIZE`
//!
//! ## Architecture
//!
//! - `middleware`: Actix-Web middleware, request lifecycle orchestration
//! - `client`: startup handshake and background publisher
//! - `pubsub`: Google Pub/Sub REST transport
//! - `payload`: telemetry record and its builder
//! - `redact`, `selector`: header and JSON-path body redaction
//! - `request_body_capture`, `response_body_capture`: body buffering and replay
//! - `context`: per-request message ID and error reporting for handlers
//! - `config`, `error`, `utils`: supporting pieces

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod payload;
pub mod prelude;
pub mod pubsub;
pub mod redact;
pub mod request_body_capture;
pub mod response_body_capture;
pub mod selector;
pub mod utils;

pub use client::{Client, ClientState};
pub use config::Config;
pub use context::{report_error, RequestContext};
pub use error::ToolkitError;
pub use middleware::ApiToolkit;
pub use payload::{ErrorDescriptor, TelemetryRecord};
pub use pubsub::Transport;
