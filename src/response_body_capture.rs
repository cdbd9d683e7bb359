//! Response body capture
//!
//! Buffers the whole response body before it is sent to the client, then
//! rebuilds the response around the buffered bytes. Status, headers and any
//! attached handler error are carried over untouched. This adds latency
//! equal to the time the handler takes to produce its body.

use actix_web::{
    body::{BodySize, BoxBody, MessageBody},
    dev::ServiceResponse,
    web::{Bytes, BytesMut},
};
use std::future::poll_fn;
use std::pin::pin;

/// Buffer the response body, returning the rebuilt response and the bytes
///
/// Bodies that declare no payload at all (`BodySize::None`) are passed
/// through as-is. A stream error ends the capture early and the partial
/// bytes are what the client receives.
pub async fn capture_response_body<B>(res: ServiceResponse<B>) -> (ServiceResponse<BoxBody>, Bytes)
where
    B: MessageBody + 'static,
{
    let mut partial = BytesMut::new();
    capture_response_body_into(res, &mut partial).await
}

/// Like [`capture_response_body`], but streamed chunks accumulate in
/// `partial` while the body is drained
///
/// If the returned future is dropped mid-drain, `partial` holds everything
/// read so far. On completion it is left empty.
pub async fn capture_response_body_into<B>(
    res: ServiceResponse<B>,
    partial: &mut BytesMut,
) -> (ServiceResponse<BoxBody>, Bytes)
where
    B: MessageBody + 'static,
{
    let (req, res) = res.into_parts();
    let (head, body) = res.into_parts();

    if matches!(body.size(), BodySize::None) {
        let res = ServiceResponse::new(req, head.set_body(body));
        return (res.map_into_boxed_body(), Bytes::new());
    }

    let bytes = match body.try_into_bytes() {
        Ok(bytes) => bytes,
        Err(body) => drain_body(body, partial).await,
    };

    let res = ServiceResponse::new(req, head.set_body(bytes.clone()));
    (res.map_into_boxed_body(), bytes)
}

async fn drain_body<B: MessageBody>(body: B, buffer: &mut BytesMut) -> Bytes {
    let mut body = pin!(body);
    if let BodySize::Sized(size) = body.size() {
        buffer.reserve(usize::try_from(size).unwrap_or(0));
    }

    loop {
        match poll_fn(|cx| body.as_mut().poll_next(cx)).await {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            Some(Err(e)) => {
                let e: Box<dyn std::error::Error> = e.into();
                tracing::warn!(error = %e, captured = buffer.len(), "response body stream failed, keeping partial body");
                break;
            }
            None => break,
        }
    }

    buffer.split().freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{
        body,
        http::{header::CONTENT_TYPE, StatusCode},
        test::{self, TestRequest},
        HttpResponse,
    };
    use futures::stream;

    #[actix_rt::test]
    async fn test_capture_sized_body() {
        let res = TestRequest::default().to_srv_response(
            HttpResponse::Created()
                .insert_header((CONTENT_TYPE, "application/json"))
                .insert_header(("x-val", "foo"))
                .body(r#"{"status":"success"}"#),
        );

        let (res, captured) = capture_response_body(res).await;

        assert_eq!(captured, Bytes::from_static(br#"{"status":"success"}"#));
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers().get("x-val").unwrap(), "foo");
        assert_eq!(res.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(test::read_body(res).await, captured);
    }

    #[actix_rt::test]
    async fn test_capture_streaming_body() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"streamed ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let res = TestRequest::default().to_srv_response(HttpResponse::Ok().streaming(stream::iter(chunks)));

        let (res, captured) = capture_response_body(res).await;

        assert_eq!(captured, Bytes::from_static(b"hello streamed world"));
        assert_eq!(test::read_body(res).await, captured);
    }

    #[actix_rt::test]
    async fn test_capture_partial_body_on_stream_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream closed")),
        ];
        let res = TestRequest::default().to_srv_response(HttpResponse::Ok().streaming(stream::iter(chunks)));

        let (res, captured) = capture_response_body(res).await;

        assert_eq!(captured, Bytes::from_static(b"partial"));
        assert_eq!(test::read_body(res).await, captured);
    }

    #[actix_rt::test]
    async fn test_capture_empty_and_bodiless_responses() {
        let res = TestRequest::default().to_srv_response(HttpResponse::Ok().finish());
        let (res, captured) = capture_response_body(res).await;
        assert!(captured.is_empty());
        assert!(test::read_body(res).await.is_empty());

        let res = TestRequest::default()
            .to_srv_response(HttpResponse::NotModified().body(body::None::new()));
        let (res, captured) = capture_response_body(res).await;
        assert!(captured.is_empty());
        assert!(matches!(res.response().body().size(), BodySize::None));
    }

    #[actix_rt::test]
    async fn test_capture_preserves_handler_error() {
        let err = actix_web::error::ErrorBadRequest("bad input");
        // built directly: `to_srv_response` rebuilds the response and loses the error
        let res = ServiceResponse::new(TestRequest::default().to_http_request(), HttpResponse::from_error(err));

        let (res, captured) = capture_response_body(res).await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(res.response().error().is_some());
        assert_eq!(captured, Bytes::from_static(b"bad input"));
    }

    #[actix_rt::test]
    async fn test_partial_bytes_survive_dropped_drain() {
        use futures::{future, FutureExt, StreamExt};

        let chunks = stream::once(future::ready(Ok::<_, std::io::Error>(Bytes::from_static(b"first"))))
            .chain(stream::pending());
        let res = TestRequest::default().to_srv_response(HttpResponse::Ok().streaming(chunks));

        let mut partial = BytesMut::new();
        {
            let capture = capture_response_body_into(res, &mut partial);
            assert!(capture.now_or_never().is_none());
        }
        assert_eq!(&partial[..], b"first");
    }

    #[actix_rt::test]
    async fn test_completed_drain_leaves_buffer_empty() {
        let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"all"))];
        let res = TestRequest::default().to_srv_response(HttpResponse::Ok().streaming(stream::iter(chunks)));

        let mut partial = BytesMut::new();
        let (_, captured) = capture_response_body_into(res, &mut partial).await;
        assert_eq!(captured, Bytes::from_static(b"all"));
        assert!(partial.is_empty());
    }
}
