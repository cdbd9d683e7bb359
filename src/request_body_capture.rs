//! Request body capture
//!
//! The payload stream of a request can only be read once. The middleware
//! drains it into memory, keeps a copy for the record, and installs a fresh
//! payload over the same bytes so the handler reads the body exactly as the
//! client sent it.

use actix_web::{
    dev::{Payload, ServiceRequest},
    error::PayloadError,
    web::{Bytes, BytesMut},
    HttpMessage,
};
use futures::{future, stream, StreamExt};

/// Buffer the whole request body and hand the handler a replay of it
///
/// A read error ends the capture early: the bytes received so far become
/// both the captured body and the body the handler sees.
pub async fn capture_request_body(req: &mut ServiceRequest) -> Bytes {
    let mut payload = req.take_payload();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = payload.next().await {
        match chunk {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(e) => {
                tracing::warn!(error = %e, captured = buffer.len(), "request body read failed, keeping partial body");
                break;
            }
        }
    }

    let bytes = buffer.freeze();
    req.set_payload(replay_payload(bytes.clone()));
    bytes
}

/// A single-chunk payload yielding `bytes`
fn replay_payload(bytes: Bytes) -> Payload {
    if bytes.is_empty() {
        return Payload::None;
    }

    Payload::Stream {
        payload: Box::pin(stream::once(future::ready(Ok::<_, PayloadError>(bytes)))),
    }
}
