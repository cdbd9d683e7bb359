//! Startup handshake against a local stand-in for the APIToolkit backend

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use apitoolkit_actix::{ApiToolkit, Client, ClientState, Config, ToolkitError};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Serve `/api/client_metadata` with a canned status and body, recording
/// the Authorization header of every call
async fn metadata_server(status: u16, body: serde_json::Value) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = web::Data::new((status, body, seen.clone()));

    let srv = HttpServer::new(move || {
        App::new().app_data(state.clone()).route(
            "/api/client_metadata",
            web::get().to(
                |req: HttpRequest, state: web::Data<(u16, serde_json::Value, Arc<Mutex<Vec<String>>>)>| async move {
                    let auth = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    state.2.lock().unwrap().push(auth);

                    let status = actix_web::http::StatusCode::from_u16(state.0).unwrap();
                    HttpResponse::build(status).json(&state.1)
                },
            ),
        )
    })
    .workers(1)
    .bind("127.0.0.1:0")
    .unwrap();

    let addr = srv.addrs()[0];
    actix_rt::spawn(srv.run());
    (addr, seen)
}

fn metadata(private_key: &str) -> serde_json::Value {
    serde_json::json!({
        "project_id": "00000000-0000-0000-0000-000000000000",
        "pubsub_project_id": "pubsub-project",
        "topic_id": "apitoolkit-go-client",
        "pubsub_push_service_account": {
            "client_email": "publisher@pubsub-project.iam.gserviceaccount.com",
            "private_key": private_key,
            "private_key_id": "key-1"
        }
    })
}

#[actix_rt::test]
async fn test_rejected_api_key_fails_construction() {
    let (addr, seen) = metadata_server(401, serde_json::json!({"error": "bad key"})).await;
    let config = Config::new("wrong-key").root_url(format!("http://{}", addr));

    let result = Client::new(config).await;
    assert!(matches!(result, Err(ToolkitError::Unauthorized)));
    assert_eq!(seen.lock().unwrap().as_slice(), ["Bearer wrong-key"]);

    let config = Config::new("wrong-key").root_url(format!("http://{}/", addr));
    assert!(ApiToolkit::new(config).await.is_err());
}

#[actix_rt::test]
async fn test_server_error_degrades_client() {
    let (addr, _) = metadata_server(500, serde_json::json!({})).await;
    let config = Config::new("key").root_url(format!("http://{}", addr));

    let client = Client::new(config).await.unwrap();
    assert!(!client.is_ready());
    assert!(matches!(client.state(), ClientState::Degraded { reason } if reason.contains("500")));
}

#[actix_rt::test]
async fn test_malformed_metadata_degrades_client() {
    let (addr, _) = metadata_server(200, serde_json::json!({"project_id": "only"})).await;
    let config = Config::new("key").root_url(format!("http://{}", addr));

    let client = Client::new(config).await.unwrap();
    assert!(!client.is_ready());
}

#[actix_rt::test]
async fn test_unusable_credentials_degrade_client() {
    let (addr, _) = metadata_server(200, metadata("not a pem key")).await;
    let config = Config::new("key").root_url(format!("http://{}", addr));

    let client = Client::new(config).await.unwrap();
    assert!(!client.is_ready());
    // the project is known even though publishing is off
    assert_eq!(client.project_id(), "00000000-0000-0000-0000-000000000000");
}

#[actix_rt::test]
async fn test_valid_metadata_produces_ready_client() {
    let key = include_str!("fixtures/test_service_account_key.pem");
    let (addr, _) = metadata_server(200, metadata(key)).await;
    let config = Config::new("key").root_url(format!("http://{}", addr));

    let client = Client::new(config).await.unwrap();
    assert!(client.is_ready());
    assert!(matches!(
        client.state(),
        ClientState::Ready { topic, .. } if topic == "projects/pubsub-project/topics/apitoolkit-go-client"
    ));
}

#[actix_rt::test]
async fn test_degraded_middleware_passes_traffic_through() {
    let (addr, _) = metadata_server(503, serde_json::json!({})).await;
    let config = Config::new("key").root_url(format!("http://{}", addr));
    let toolkit = ApiToolkit::new(config).await.unwrap();
    assert!(!toolkit.client().is_ready());

    let app = actix_web::test::init_service(
        App::new()
            .wrap(toolkit)
            .route("/echo", web::post().to(|body: String| async move { HttpResponse::Ok().body(body) })),
    )
    .await;

    let req = actix_web::test::TestRequest::post()
        .uri("/echo")
        .set_payload("still served")
        .to_request();
    let body = actix_web::test::call_and_read_body(&app, req).await;
    assert_eq!(body, "still served");
}
