//! HTTP transport shim
//!
//! Two routes under a configurable prefix:
//! - `GET {prefix}/` status check
//! - `ANY {prefix}/tp2` event submission (also answers CORS preflight)
//!
//! The submission route always answers `200 ok`. Decode and store failures
//! are logged by the pipeline and never surface to the sender.

use crate::collector_core::pipeline::EventPipeline;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Visitor identification cookie
pub const VISITOR_COOKIE: &str = "sp";

/// Two years, in seconds
pub const VISITOR_COOKIE_MAX_AGE: i64 = 86_400 * 365 * 2;

const PREFLIGHT_ALLOW_HEADERS: &str = "Access-Control-Allow-Origin,Origin,Content-Length,Content-Type";
const PREFLIGHT_ALLOW_METHODS: &str = "GET,POST";
const PREFLIGHT_MAX_AGE: &str = "43200";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<EventPipeline>,
    request_timeout: Duration,
    default_origin: String,
}

impl AppState {
    pub fn new(pipeline: Arc<EventPipeline>, request_timeout: Duration, default_origin: impl Into<String>) -> Self {
        Self {
            pipeline,
            request_timeout,
            default_origin: default_origin.into(),
        }
    }
}

/// Build the collector router. `prefix` is either empty or starts with `/`
/// and has no trailing slash.
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let mut router = Router::new()
        .route(&format!("{}/", prefix), get(status))
        .route(&format!("{}/tp2", prefix), any(track));

    if !prefix.is_empty() {
        router = router.route(prefix, get(status));
    }

    router.with_state(state)
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    status: &'a str,
}

async fn status() -> impl IntoResponse {
    Json(StatusResponse { status: "ok" })
}

async fn track(State(state): State<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    let mut response_headers = HeaderMap::new();

    if !has_visitor_cookie(&headers) {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}",
            VISITOR_COOKIE,
            Uuid::new_v4(),
            VISITOR_COOKIE_MAX_AGE
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response_headers.insert(header::SET_COOKIE, value);
        }
    }

    if method == Method::OPTIONS {
        set_preflight_headers(&mut response_headers, &headers, &state.default_origin);
        return (StatusCode::OK, response_headers, "text/plain").into_response();
    }

    let received_at = chrono::Utc::now().timestamp();
    let deadline = tokio::time::Instant::now() + state.request_timeout;
    state.pipeline.process_body(&body, received_at, deadline).await;

    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    (StatusCode::OK, response_headers, "ok").into_response()
}

fn has_visitor_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, _)| name == VISITOR_COOKIE)
}

fn set_preflight_headers(out: &mut HeaderMap, request: &HeaderMap, default_origin: &str) {
    let origin = request
        .get(header::ORIGIN)
        .filter(|value| !value.is_empty())
        .cloned()
        .or_else(|| HeaderValue::from_str(default_origin).ok());

    if let Some(origin) = origin {
        out.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    out.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
    );
    out.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    out.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
    );
    out.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::record::DEFAULT_EVENT_TTL_SECS;
    use crate::collector_core::summary::DEFAULT_SUMMARY_TTL_SECS;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(store: Arc<InMemoryStore>) -> Router {
        let pipeline = Arc::new(EventPipeline::new(store, DEFAULT_EVENT_TTL_SECS, DEFAULT_SUMMARY_TTL_SECS));
        build_router(
            AppState::new(pipeline, Duration::from_secs(5), "http://localhost:8000"),
            "/api",
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_status_route() {
        let response = router(Arc::new(InMemoryStore::new()))
            .oneshot(Request::builder().uri("/api/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_submission_stores_events_and_sets_cookie() {
        let store = Arc::new(InMemoryStore::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/tp2")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"data":[{"url":"https://example.com/a"}]}"#))
            .unwrap();

        let response = router(store.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("sp="));
        assert!(cookie.contains("Max-Age=63072000"));
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.summary_len(), 1);
    }

    #[tokio::test]
    async fn test_existing_cookie_kept() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/tp2")
            .header(header::COOKIE, "theme=dark; sp=abc")
            .body(Body::from("{}"))
            .unwrap();

        let response = router(Arc::new(InMemoryStore::new())).oneshot(request).await.unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_still_ok() {
        let store = Arc::new(InMemoryStore::new());
        let request = Request::builder()
            .method("POST")
            .uri("/api/tp2")
            .body(Body::from("{broken"))
            .unwrap();

        let response = router(store.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(store.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_preflight_echoes_origin() {
        let store = Arc::new(InMemoryStore::new());
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/tp2")
            .header(header::ORIGIN, "https://shop.example.com")
            .body(Body::empty())
            .unwrap();

        let response = router(store.clone()).oneshot(request).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://shop.example.com");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET,POST");
        assert_eq!(store.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_preflight_default_origin() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/tp2")
            .body(Body::empty())
            .unwrap();

        let response = router(Arc::new(InMemoryStore::new())).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_cookie_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_visitor_cookie(&headers));
        headers.insert(header::COOKIE, HeaderValue::from_static("spx=1; other=2"));
        assert!(!has_visitor_cookie(&headers));
        headers.insert(header::COOKIE, HeaderValue::from_static("other=2; sp=uuid"));
        assert!(has_visitor_cookie(&headers));
    }
}
