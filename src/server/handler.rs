use crate::dns::flush::CacheFlusher;
use crate::error::TraceError;
use crate::http::tracer::Tracer;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;

pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Deserialize)]
pub struct TraceRequest {
    #[serde(default)]
    pub url: String,
}

/// Ways an inbound trace request ends without a timing result.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid request method")]
    MethodNotAllowed,
    #[error("Invalid request body")]
    DecodeFailed(String),
    #[error("Error tracing URL: {0}")]
    TraceFailed(#[from] TraceError),
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HandlerError::DecodeFailed(_) => StatusCode::BAD_REQUEST,
            HandlerError::TraceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        text_response(self.status(), format!("{}\n", self))
    }
}

pub async fn route<F, B>(
    req: Request<B>,
    tracer: Arc<Tracer<F>>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    F: CacheFlusher,
    B: Body,
    B::Error: Display,
{
    if req.uri().path() == HEALTH_PATH {
        return Ok(Response::new(Full::new(Bytes::new())));
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let res = match handle_trace(req, &tracer).await {
        Ok(res) => res,
        Err(e) => {
            match &e {
                HandlerError::TraceFailed(cause) => warn!("{} {}: {}", method, path, cause),
                HandlerError::DecodeFailed(cause) => debug!("{} {}: {}", method, path, cause),
                HandlerError::MethodNotAllowed => debug!("{} {}: rejected method", method, path),
            }
            e.into_response()
        }
    };
    Ok(res)
}

async fn handle_trace<F, B>(
    req: Request<B>,
    tracer: &Tracer<F>,
) -> Result<Response<Full<Bytes>>, HandlerError>
where
    F: CacheFlusher,
    B: Body,
    B::Error: Display,
{
    if req.method() != Method::POST {
        return Err(HandlerError::MethodNotAllowed);
    }

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| HandlerError::DecodeFailed(e.to_string()))?
        .to_bytes();
    let trace_request: TraceRequest =
        serde_json::from_slice(&body).map_err(|e| HandlerError::DecodeFailed(e.to_string()))?;

    let result = tracer.trace(&trace_request.url).await?;
    let json = match serde_json::to_vec(&result) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode trace result: {}", e);
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode trace result\n".to_string(),
            ));
        }
    };

    let mut res = Response::new(Full::new(Bytes::from(json)));
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(res)
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::from(body)));
    *res.status_mut() = status;
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res.headers_mut()
        .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::flush::NoopFlusher;
    use crate::http::timing_connector::TimingConnector;
    use crate::http::tracer::ClientPolicy;
    use crate::test_support::{spawn_origin, CountingFlusher, FailingFlusher};
    use crate::tls::config::client_config;

    fn tracer<F: CacheFlusher>(flusher: F) -> Arc<Tracer<F>> {
        let connector = TimingConnector::new(client_config(false, None).unwrap());
        Arc::new(Tracer::new(flusher, connector, ClientPolicy::default()))
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_text(res: Response<Full<Bytes>>) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_non_post_is_rejected_without_tracing() {
        let flusher = CountingFlusher::default();
        let tracer = tracer(flusher.clone());
        for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            let res = route(request(method, "/", r#"{"url":"http://127.0.0.1/"}"#), tracer.clone())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(res.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
            assert_eq!(body_text(res).await, "Invalid request method\n");
        }
        assert_eq!(flusher.count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let flusher = CountingFlusher::default();
        let tracer = tracer(flusher.clone());
        for body in ["", "{", "not json", r#"{"url": 5}"#] {
            let res = route(request(Method::POST, "/", body), tracer.clone())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(
                res.headers()[CONTENT_TYPE],
                "text/plain; charset=utf-8"
            );
            assert_eq!(res.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
            assert_eq!(body_text(res).await, "Invalid request body\n");
        }
        assert_eq!(flusher.count(), 0);
    }

    #[tokio::test]
    async fn test_flush_failure_is_server_error() {
        let res = route(
            request(Method::POST, "/", r#"{"url":"http://127.0.0.1:1/"}"#),
            tracer(FailingFlusher),
        )
        .await
        .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(res).await;
        assert!(text.starts_with("Error tracing URL: failed to flush DNS"), "{text}");
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_cause() {
        let res = route(
            request(Method::POST, "/", r#"{"url":"http://example.invalid"}"#),
            tracer(NoopFlusher),
        )
        .await
        .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(res).await;
        assert!(text.starts_with("Error tracing URL: "));
        assert!(text.contains("dns lookup of example.invalid failed"), "{text}");
        assert!(serde_json::from_str::<serde_json::Value>(&text).is_err());
    }

    #[tokio::test]
    async fn test_missing_url_field_fails_the_trace() {
        let res = route(request(Method::POST, "/", "{}"), tracer(NoopFlusher))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_successful_trace_is_json() {
        let origin = spawn_origin().await;
        let body = serde_json::json!({ "url": origin.url("/") }).to_string();
        let res = route(request(Method::POST, "/", &body), tracer(NoopFlusher))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");

        let json: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
        assert!(json["dns_lookup_ms"].is_null());
        assert!(json["tls_handshake_ms"].is_null());
        assert!(json["tcp_connect_ms"].as_i64().unwrap() >= 0);
        let ttfb = json["time_to_first_byte_ms"].as_i64().unwrap();
        let total = json["total_time_ms"].as_i64().unwrap();
        assert!(total >= ttfb && ttfb >= 0);
    }

    #[tokio::test]
    async fn test_health_ignores_tracer_state() {
        let res = route(request(Method::GET, HEALTH_PATH, ""), tracer(FailingFlusher))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_text(res).await, "");
    }
}
