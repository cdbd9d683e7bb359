//! Basic usage example for the APIToolkit Actix SDK
//!
//! This example demonstrates how to integrate the middleware into an Actix-Web application.
//!
//! Run with:
//! ```bash
//! APITOOLKIT_KEY=<your key> \
//! APITOOLKIT_DEBUG=true \
//! APITOOLKIT_REDACT_REQUEST_BODY='$.password,$.card.number' \
//! RUST_LOG=info \
//! cargo run --example basic_usage
//! ```

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use apitoolkit_actix::prelude::*;
use tracing_subscriber::EnvFilter;

async fn index() -> HttpResponse {
    HttpResponse::Ok().body("Hello APIToolkit!")
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "example-app"
    }))
}

/// Echoes the body back; the published record has `password` redacted
async fn login(body: web::Json<serde_json::Value>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "user": body.get("username").cloned().unwrap_or_default(),
        "token": "not-a-real-token"
    }))
}

async fn greet(path: web::Path<String>, ctx: RequestContext) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "hello": path.into_inner(),
        "msg_id": ctx.msg_id()
    }))
}

async fn divide(req: HttpRequest, query: web::Query<std::collections::HashMap<String, String>>) -> HttpResponse {
    match query.get("n").map(|n| n.parse::<i64>()) {
        Some(Ok(n)) if n != 0 => HttpResponse::Ok().body((100 / n).to_string()),
        Some(Err(e)) => {
            // surfaces in the record's `errors` without failing the request
            report_error(&req, &e);
            HttpResponse::BadRequest().body("n must be an integer")
        }
        _ => HttpResponse::BadRequest().body("n must be a non-zero integer"),
    }
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?.redact_response_body(["$.token"]);
    let apitoolkit = ApiToolkit::new(config).await?;

    tracing::info!("Starting example server on http://0.0.0.0:8080");
    tracing::info!("Try: GET /, GET /health, POST /login, GET /hello/{{name}}, GET /divide?n=4");

    HttpServer::new(move || {
        App::new()
            .wrap(apitoolkit.clone())
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/health").route(web::get().to(health)))
            .service(web::resource("/login").route(web::post().to(login)))
            .service(web::resource("/hello/{name}").route(web::get().to(greet)))
            .service(web::resource("/divide").route(web::get().to(divide)))
    })
    .bind("0.0.0.0:8080")?
    .run()
    .await?;

    Ok(())
}
