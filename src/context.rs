//! Per-request context shared with handlers
//!
//! The middleware stores a [`RequestContext`] in the request extensions
//! before the handler runs. Handlers take it as an extractor to read the
//! message ID or to report errors that should travel with the record:
//!
//! ```rust,ignore
//! async fn checkout(ctx: RequestContext) -> HttpResponse {
//!     if let Err(e) = charge_card().await {
//!         ctx.report_error(&e);
//!     }
//!     HttpResponse::Ok().finish()
//! }
//! ```

use actix_web::{dev::Payload, error::ErrorInternalServerError, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::sync::Arc;

use crate::client::Client;
use crate::payload::ErrorDescriptor;
use crate::utils::generate_msg_id;

/// Correlation state for one request
#[derive(Clone)]
pub struct RequestContext {
    msg_id: Arc<str>,
    errors: Arc<Mutex<Vec<ErrorDescriptor>>>,
    client: Arc<Client>,
}

impl RequestContext {
    /// Fresh context with a new message ID and no errors
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            msg_id: generate_msg_id().into(),
            errors: Arc::new(Mutex::new(Vec::new())),
            client,
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Attach an error to this request's record
    pub fn report_error<E: StdError + 'static>(&self, err: &E) {
        self.push_error(ErrorDescriptor::from_error(err));
    }

    pub fn push_error(&self, descriptor: ErrorDescriptor) {
        self.errors.lock().push(descriptor);
    }

    /// Errors reported so far
    pub fn errors(&self) -> Vec<ErrorDescriptor> {
        self.errors.lock().clone()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("msg_id", &self.msg_id)
            .field("errors", &self.errors.lock().len())
            .finish()
    }
}

impl FromRequest for RequestContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<RequestContext>()
                .cloned()
                .ok_or_else(|| ErrorInternalServerError("APIToolkit middleware is not installed")),
        )
    }
}

/// Attach an error to the record of the request being handled
///
/// A no-op when the middleware is not installed.
pub fn report_error<E: StdError + 'static>(req: &HttpRequest, err: &E) {
    if let Some(ctx) = req.extensions().get::<RequestContext>() {
        ctx.report_error(err);
    }
}
