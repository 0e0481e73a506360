use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::errors::AppError;
use crate::AppState;

pub mod bling;
pub mod diagnostics;
pub mod homologation;
pub mod marketplace;
pub mod webhook;

/// Webhook bodies and token payloads are small.
const BODY_LIMIT: usize = 1024 * 1024;

/// Builds the full HTTP surface. Every `/api/*` route answers OPTIONS with
/// its own CORS allow lists and any other unlisted method with a JSON 405.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/bling-config",
            endpoint(get(bling::config), &[Method::GET], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/bling-token",
            endpoint(post(bling::exchange_token), &[Method::POST], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/bling-token-test",
            endpoint(get(bling::probe_token), &[Method::GET], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/debug-bling",
            endpoint(get(bling::debug_endpoints), &[Method::GET], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/mercadolivre-token",
            endpoint(post(marketplace::exchange_token), &[Method::POST], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/mercadolivre-refresh",
            endpoint(post(marketplace::refresh_token), &[Method::POST], &[header::CONTENT_TYPE]),
        )
        .route(
            "/api/bling-webhook",
            endpoint(
                post(webhook::receive),
                &[Method::POST],
                &[header::CONTENT_TYPE, HeaderName::from_static(crate::webhook::SIGNATURE_HEADER)],
            ),
        )
        .route(
            "/api/bling-homologacao",
            endpoint(post(homologation::run), &[Method::POST], &[header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .route(
            "/api/bling-test",
            endpoint(get(homologation::connectivity), &[Method::GET], &[header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .route(
            "/api/fix-callback",
            endpoint(
                get(diagnostics::fix_callback).post(diagnostics::fix_callback),
                &[Method::GET, Method::POST],
                &[header::CONTENT_TYPE],
            ),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Wraps a route with its CORS policy and the JSON 405 fallback. The CORS
/// layer answers every OPTIONS request itself with 200.
fn endpoint(
    route: MethodRouter<Arc<AppState>>,
    methods: &[Method],
    headers: &[HeaderName],
) -> MethodRouter<Arc<AppState>> {
    let mut allowed = methods.to_vec();
    allowed.push(Method::OPTIONS);

    route.fallback(method_not_allowed).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(allowed)
            .allow_headers(headers.to_vec()),
    )
}

async fn method_not_allowed(method: Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "method not allowed",
            "code": "method_not_allowed",
            "method": method.as_str(),
        })),
    )
        .into_response()
}

/// `Host` header of the incoming request, used to derive callback URLs.
pub(crate) fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

/// Non-blank value of a required input, or 400 naming the parameter.
pub(crate) fn required(value: Option<String>, name: &'static str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(AppError::MissingParameter(name))
}

/// Parses an optional JSON request body. An empty body yields the default
/// value so the missing-field checks report which parameter is absent.
pub(crate) fn json_body<T>(body: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::InvalidBody(e.to_string()))
}

/// Middleware: tags every request with a UUID, opens a span carrying it and
/// echoes it back in `x-request-id` so clients can correlate with logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %req_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    // Token responses must never be cached
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);

    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct Probe {
        #[serde(default)]
        value: Option<String>,
    }

    #[test]
    fn test_required_rejects_blank() {
        assert_eq!(required(Some("x".into()), "value").unwrap(), "x");
        assert!(matches!(required(Some("  ".into()), "value"), Err(AppError::MissingParameter("value"))));
        assert!(matches!(required(None, "value"), Err(AppError::MissingParameter("value"))));
    }

    #[test]
    fn test_json_body_empty_is_default() {
        let probe: Probe = json_body(b"").unwrap();
        assert!(probe.value.is_none());

        let probe: Probe = json_body(br#"{"value":"v"}"#).unwrap();
        assert_eq!(probe.value.as_deref(), Some("v"));

        assert!(matches!(json_body::<Probe>(b"{"), Err(AppError::InvalidBody(_))));
    }
}
