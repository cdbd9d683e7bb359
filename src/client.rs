//! APIToolkit client: startup handshake and the publisher
//!
//! [`Client::new`] fetches the project metadata once and ends up in one of
//! three outcomes:
//! - `Err(ToolkitError::Unauthorized)`: the API key was rejected, construction fails
//! - [`ClientState::Degraded`]: anything else went wrong, publishing is disabled
//! - [`ClientState::Ready`]: records are published to the project's topic
//!
//! The state is fixed after construction and checked before every publish.

use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ToolkitError;
use crate::payload::{build_payload, Exchange, PayloadSettings, TelemetryRecord};
use crate::pubsub::{topic_path, PubSubTransport, ServiceAccountKey, Transport};
use crate::redact::RedactionRules;

/// Project metadata returned by `GET {root_url}/api/client_metadata`
#[derive(Deserialize, Debug, Clone)]
pub struct ClientMetadata {
    pub project_id: String,
    pub pubsub_project_id: String,
    pub topic_id: String,
    pub pubsub_push_service_account: ServiceAccountKey,
}

/// Whether the client can publish
pub enum ClientState {
    Ready {
        transport: Arc<dyn Transport>,
        topic: String,
    },
    Degraded {
        reason: String,
    },
}

impl fmt::Debug for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Ready { topic, .. } => f.debug_struct("Ready").field("topic", topic).finish(),
            ClientState::Degraded { reason } => {
                f.debug_struct("Degraded").field("reason", reason).finish()
            }
        }
    }
}

/// Process-wide APIToolkit client
///
/// Built once at startup and shared (via `Arc`) by every middleware
/// instance and request.
#[derive(Debug)]
pub struct Client {
    config: Config,
    rules: RedactionRules,
    settings: PayloadSettings,
    state: ClientState,
}

impl Client {
    /// Perform the metadata handshake and set up publishing
    ///
    /// Fails on a rejected API key or an invalid redaction selector. Every
    /// other failure yields a degraded client.
    pub async fn new(config: Config) -> Result<Self, ToolkitError> {
        let rules = RedactionRules::compile(&config)?;
        if config.debug {
            info!(root_url = %config.root_url, "APIToolkit: initialize");
        }

        let metadata = match fetch_metadata(&config).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "APIToolkit: client metadata unavailable, publishing disabled");
                return Ok(Self::assemble(config, rules, String::new(), degraded(e)));
            }
        };

        let topic = topic_path(&metadata.pubsub_project_id, &metadata.topic_id);
        let state = match PubSubTransport::new(metadata.pubsub_push_service_account, topic.clone()) {
            Ok(transport) => {
                if config.debug {
                    info!(project_id = %metadata.project_id, topic = %topic, "APIToolkit: ready");
                }
                ClientState::Ready {
                    transport: Arc::new(transport),
                    topic,
                }
            }
            Err(e) => {
                warn!(error = %e, "APIToolkit: publisher credentials unusable, publishing disabled");
                degraded(e)
            }
        };

        Ok(Self::assemble(config, rules, metadata.project_id, state))
    }

    /// A ready client publishing through a custom transport
    pub fn with_transport(
        config: Config,
        project_id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ToolkitError> {
        let rules = RedactionRules::compile(&config)?;
        let state = ClientState::Ready {
            transport,
            topic: "custom".to_string(),
        };
        Ok(Self::assemble(config, rules, project_id.into(), state))
    }

    /// A client that never publishes
    pub fn disabled(config: Config, reason: impl Into<String>) -> Result<Self, ToolkitError> {
        let rules = RedactionRules::compile(&config)?;
        let state = ClientState::Degraded {
            reason: reason.into(),
        };
        Ok(Self::assemble(config, rules, String::new(), state))
    }

    fn assemble(config: Config, rules: RedactionRules, project_id: String, state: ClientState) -> Self {
        let settings = PayloadSettings {
            project_id,
            service_version: config.service_version.clone(),
            tags: config.tags.clone(),
            max_body_size: config.max_body_size,
        };
        Self {
            config,
            rules,
            settings,
            state,
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ClientState::Ready { .. })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rules(&self) -> &RedactionRules {
        &self.rules
    }

    pub fn project_id(&self) -> &str {
        &self.settings.project_id
    }

    /// Assemble the record for one exchange with this client's rules
    pub fn build_payload(&self, exchange: &Exchange) -> TelemetryRecord {
        if self.config.debug {
            debug!(msg_id = %exchange.msg_id, "APIToolkit: build_payload");
        }
        build_payload(exchange, &self.rules, &self.settings)
    }

    /// Publish a record in the background
    ///
    /// Never fails and never waits for delivery: a degraded client drops the
    /// record, transport errors are logged (in debug mode) and discarded.
    pub fn publish(&self, record: TelemetryRecord) {
        let ClientState::Ready { transport, topic } = &self.state else {
            if self.config.debug {
                debug!(msg_id = %record.msg_id, "APIToolkit: publishing disabled, record dropped");
            }
            return;
        };

        let data = match self.encode(&record, topic) {
            Ok(data) => data,
            Err(e) => {
                warn!(msg_id = %record.msg_id, error = %e, "APIToolkit: failed to encode record");
                return;
            }
        };

        let transport = transport.clone();
        let debug = self.config.debug;
        let msg_id = record.msg_id;
        spawn_detached(&msg_id.clone(), async move {
            if let Err(e) = transport.publish(data).await {
                if debug {
                    warn!(msg_id = %msg_id, error = %e, "APIToolkit: failed to publish message");
                }
            }
        });
    }

    /// Build and publish the record for `exchange` in the background
    ///
    /// Redaction, encoding and delivery all run on the spawned task, so
    /// the caller only pays for the spawn. Same failure policy as
    /// [`Client::publish`].
    pub fn publish_exchange(self: &Arc<Self>, exchange: Exchange) {
        if !self.is_ready() {
            if self.config.debug {
                debug!(msg_id = %exchange.msg_id, "APIToolkit: publishing disabled, record dropped");
            }
            return;
        }

        let client = Arc::clone(self);
        let msg_id = exchange.msg_id.clone();
        spawn_detached(&msg_id, async move {
            let record = client.build_payload(&exchange);
            if let Err(e) = client.send(&record).await {
                if client.config.debug {
                    warn!(msg_id = %record.msg_id, error = %e, "APIToolkit: failed to publish message");
                }
            }
        });
    }

    /// Publish a record and wait for the transport to accept it
    pub async fn send(&self, record: &TelemetryRecord) -> Result<(), ToolkitError> {
        match &self.state {
            ClientState::Ready { transport, topic } => {
                let data = self.encode(record, topic)?;
                transport.publish(data).await
            }
            ClientState::Degraded { reason } => Err(ToolkitError::PublishingDisabled(reason.clone())),
        }
    }

    fn encode(&self, record: &TelemetryRecord, topic: &str) -> Result<Vec<u8>, ToolkitError> {
        if self.config.debug {
            let pretty = serde_json::to_string_pretty(record)?;
            info!(msg_id = %record.msg_id, topic = %topic, "APIToolkit: publish message\n{}", pretty);
        }
        Ok(serde_json::to_vec(record)?)
    }
}

/// Run `task` on the current Tokio runtime, or drop the record when there is none
fn spawn_detached<F>(msg_id: &str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => warn!(msg_id = %msg_id, "APIToolkit: no Tokio runtime, record dropped"),
    }
}

fn degraded(error: ToolkitError) -> ClientState {
    ClientState::Degraded {
        reason: error.to_string(),
    }
}

/// Fetch the project metadata with the configured API key
pub async fn fetch_metadata(config: &Config) -> Result<ClientMetadata, ToolkitError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = http
        .get(config.metadata_url())
        .bearer_auth(&config.api_key)
        .send()
        .await?;

    match response.status() {
        StatusCode::UNAUTHORIZED => Err(ToolkitError::Unauthorized),
        status if !status.is_success() => Err(ToolkitError::HandshakeFailed(status)),
        _ => {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ErrorDescriptor, RequestSnapshot};
    use crate::pubsub::MemoryTransport;
    use actix_web::web::Bytes;

    fn exchange() -> Exchange {
        Exchange {
            msg_id: "msg-1".to_string(),
            request: RequestSnapshot {
                method: "GET".to_string(),
                host: "http://localhost".to_string(),
                path: "/api/test".to_string(),
                ..Default::default()
            },
            request_body: Bytes::from_static(br#"{"password":"x"}"#),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_with_ready_client() {
        let transport = Arc::new(MemoryTransport::default());
        let config = Config::new("key").redact_request_body(["$.password"]).tags(["t1"]);
        let client = Client::with_transport(config, "project-9", transport.clone()).unwrap();
        assert!(client.is_ready());

        let record = client.build_payload(&exchange());
        client.publish(record);

        let records = transport.wait_for(1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project_id, "project-9");
        assert_eq!(records[0].tags, vec!["t1"]);
        assert_eq!(records[0].msg_id, "msg-1");
    }

    #[tokio::test]
    async fn test_publish_exchange_builds_record_in_background() {
        let transport = Arc::new(MemoryTransport::default());
        let config = Config::new("key").redact_request_body(["$.password"]);
        let client = Arc::new(Client::with_transport(config, "project-9", transport.clone()).unwrap());

        client.publish_exchange(exchange());

        let records = transport.wait_for(1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].msg_id, "msg-1");
        assert_eq!(records[0].request_body, "eyJwYXNzd29yZCI6IltDTElFTlRfUkVEQUNURURdIn0=");
    }

    #[tokio::test]
    async fn test_publish_exchange_with_degraded_client_is_noop() {
        let client = Arc::new(Client::disabled(Config::new("key").debug(true), "offline").unwrap());
        client.publish_exchange(exchange());
        assert!(!client.is_ready());
    }

    #[test]
    fn test_publish_exchange_without_runtime_does_not_panic() {
        let transport = Arc::new(MemoryTransport::default());
        let client = Arc::new(Client::with_transport(Config::new("key"), "p", transport.clone()).unwrap());
        client.publish_exchange(exchange());
        assert!(transport.records().is_empty());
    }

    #[tokio::test]
    async fn test_publish_with_degraded_client_is_noop() {
        let client = Client::disabled(Config::new("key"), "handshake failed").unwrap();
        assert!(!client.is_ready());
        assert!(matches!(client.state(), ClientState::Degraded { reason } if reason == "handshake failed"));

        let record = client.build_payload(&exchange());
        client.publish(record.clone());

        let result = client.send(&record).await;
        assert!(matches!(result, Err(ToolkitError::PublishingDisabled(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let transport = Arc::new(MemoryTransport::failing());
        let client = Client::with_transport(Config::new("key").debug(true), "p", transport.clone()).unwrap();

        let mut exchange = exchange();
        exchange.errors.push(ErrorDescriptor::new("boom"));
        let record = client.build_payload(&exchange);

        // fire-and-forget never surfaces the failure
        client.publish(record.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.records().is_empty());

        // the awaitable variant does
        assert!(matches!(client.send(&record).await, Err(ToolkitError::PublishFailed(_))));
    }

    #[test]
    fn test_publish_without_runtime_does_not_panic() {
        let transport = Arc::new(MemoryTransport::default());
        let client = Client::with_transport(Config::new("key"), "p", transport.clone()).unwrap();
        client.publish(client.build_payload(&exchange()));
        assert!(transport.records().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_selector_fails_construction() {
        let config = Config::new("key").redact_response_body(["data.token"]);
        let result = Client::with_transport(config, "p", Arc::new(MemoryTransport::default()));
        assert!(matches!(result, Err(ToolkitError::InvalidSelector(_))));

        let config = Config::new("key")
            .root_url("http://127.0.0.1:9")
            .redact_request_body(["$.ok", "[broken"]);
        assert!(matches!(Client::new(config).await, Err(ToolkitError::InvalidSelector(_))));
    }

    #[tokio::test]
    async fn test_unreachable_metadata_endpoint_degrades() {
        // port 9 (discard) is closed on test machines; the connection is refused
        let config = Config::new("key").root_url("http://127.0.0.1:9");
        let client = Client::new(config).await.unwrap();
        assert!(!client.is_ready());
        assert_eq!(client.project_id(), "");
    }
}
