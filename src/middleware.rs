//! Actix-Web middleware implementation for APIToolkit
//!
//! Every request goes through the same lifecycle:
//!
//! 1. a [`RequestContext`] (message ID, error list) is attached and the timer starts
//! 2. the request body is buffered and replayed to the handler
//! 3. the handler runs; errors are recorded, never swallowed
//! 4. the response body is buffered and replayed to the client
//! 5. the record is built and published in the background
//!
//! Step 5 also runs when the request future is dropped halfway (client
//! disconnect, timeout), with whatever had been captured by then.

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web::{Bytes, BytesMut},
    Error, HttpMessage,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::client::Client;
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::ToolkitError;
use crate::payload::{ErrorDescriptor, Exchange, RequestSnapshot, ResponseSnapshot};
use crate::request_body_capture::capture_request_body;
use crate::response_body_capture::capture_response_body_into;

/// APIToolkit middleware for Actix-Web
///
/// Build it once, before the server starts, and clone it into the app
/// factory:
///
/// ```rust,no_run
/// use actix_web::{web, App, HttpResponse, HttpServer};
/// use apitoolkit_actix::{ApiToolkit, Config};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let apitoolkit = ApiToolkit::new(Config::new("<API_KEY>")).await?;
///
/// HttpServer::new(move || {
///     App::new()
///         .wrap(apitoolkit.clone())
///         .route("/", web::get().to(|| async { HttpResponse::Ok().body("Hello!") }))
/// })
/// .bind("0.0.0.0:8080")?
/// .run()
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiToolkit {
    client: Arc<Client>,
}

impl ApiToolkit {
    /// Run the startup handshake and build the middleware
    ///
    /// Only a rejected API key (or an invalid redaction selector) is an
    /// error; an unreachable backend yields a middleware that passes
    /// traffic through without publishing.
    pub async fn new(config: Config) -> Result<Self, ToolkitError> {
        let client = Client::new(config).await?;
        Ok(Self::from_client(Arc::new(client)))
    }

    /// Wrap an already constructed client
    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiToolkit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiToolkitService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ApiToolkitService {
            service: Rc::new(service),
            client: self.client.clone(),
        })
    }
}

/// The per-worker service created by [`ApiToolkit`]
pub struct ApiToolkitService<S> {
    service: Rc<S>,
    client: Arc<Client>,
}

impl<S, B> Service<ServiceRequest> for ApiToolkitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let context = RequestContext::new(self.client.clone());
        req.extensions_mut().insert(context.clone());

        // Degraded: nothing will be published, so skip buffering entirely
        if !self.client.is_ready() {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_boxed_body())
            });
        }

        let service = self.service.clone();
        let mut in_flight = InFlight::start(context, RequestSnapshot::capture(&req));

        Box::pin(async move {
            let request_body = capture_request_body(&mut req).await;
            in_flight.set_request_body(request_body);

            match service.call(req).await {
                Ok(res) => {
                    if let Some(err) = res.response().error() {
                        in_flight.context.push_error(ErrorDescriptor::from_actix(err));
                    }
                    in_flight.update_route(&res);
                    in_flight.set_response(ResponseSnapshot::capture(&res));

                    let (res, response_body) =
                        capture_response_body_into(res, &mut in_flight.response_partial).await;
                    in_flight.finish(response_body);
                    Ok(res)
                }
                Err(err) => {
                    in_flight.context.push_error(ErrorDescriptor::from_actix(&err));
                    in_flight.finish(Bytes::new());
                    Err(err)
                }
            }
        })
    }
}

/// Telemetry state of a request that has not been published yet
///
/// Publishes on drop if [`InFlight::finish`] was never reached, with
/// whatever had been captured: request data, the response status and
/// headers once known, and response bytes drained so far.
struct InFlight {
    context: RequestContext,
    started: Instant,
    state: Option<Exchange>,
    response_partial: BytesMut,
}

impl InFlight {
    fn start(context: RequestContext, request: RequestSnapshot) -> Self {
        let exchange = Exchange {
            msg_id: context.msg_id().to_string(),
            request,
            ..Default::default()
        };
        Self {
            context,
            started: Instant::now(),
            state: Some(exchange),
            response_partial: BytesMut::new(),
        }
    }

    fn set_request_body(&mut self, body: Bytes) {
        if let Some(exchange) = self.state.as_mut() {
            exchange.request_body = body;
        }
    }

    fn update_route<B>(&mut self, res: &ServiceResponse<B>) {
        if let Some(exchange) = self.state.as_mut() {
            exchange.request.update_route(res.request());
        }
    }

    fn set_response(&mut self, response: ResponseSnapshot) {
        if let Some(exchange) = self.state.as_mut() {
            exchange.response = Some(response);
        }
    }

    fn finish(&mut self, response_body: Bytes) {
        if let Some(exchange) = self.state.as_mut() {
            exchange.response_body = response_body;
        }
        self.publish();
    }

    fn publish(&mut self) {
        let Some(mut exchange) = self.state.take() else {
            return;
        };
        exchange.duration = self.started.elapsed();
        exchange.errors = self.context.errors();
        if exchange.response_body.is_empty() && !self.response_partial.is_empty() {
            exchange.response_body = self.response_partial.split().freeze();
        }

        // redaction and encoding run on the background task
        self.context.client().publish_exchange(exchange);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.state.is_some() {
            tracing::debug!(msg_id = %self.context.msg_id(), "request dropped before completion, publishing partial record");
            self.publish();
        }
    }
}
