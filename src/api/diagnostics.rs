//! Callback diagnostics for the Bling OAuth setup. Reports which settings
//! are present and never their values.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{request_host, required};
use crate::config::{callback_url, Credentials};
use crate::errors::AppError;
use crate::models::token::IssuedToken;
use crate::oauth::CredentialPlacement;
use crate::AppState;

const ACTIONS: [&str; 3] = ["diagnose", "test-endpoint", "fix-callback"];

#[derive(Debug, Default, Deserialize)]
pub struct DiagnosticsParams {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// GET|POST /api/fix-callback?action=
pub async fn fix_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DiagnosticsParams>,
) -> Result<Response, AppError> {
    match params.action.as_deref() {
        Some("diagnose") => Ok(diagnose(&state, &headers).await.into_response()),
        Some("test-endpoint") => Ok(test_endpoints(&state).await.into_response()),
        Some("fix-callback") => retry_with_host_callback(&state, &headers, params.code).await,
        other => {
            tracing::debug!(action = ?other, "unknown diagnostics action");
            Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "action not specified",
                    "code": "missing_parameter",
                    "available_actions": ACTIONS,
                })),
            )
                .into_response())
        }
    }
}

fn forwarded_proto(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https")
}

/// Callback URL the browser is expected to come back to on this host.
fn expected_callback(headers: &HeaderMap) -> String {
    callback_url(forwarded_proto(headers), request_host(headers), "callback.html")
}

#[derive(Debug, Serialize)]
pub struct Reachability {
    pub endpoint: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Posts an invalid grant: any HTTP answer proves the endpoint is reachable.
async fn check_reachable(http: &reqwest::Client, endpoint: &str) -> Reachability {
    let started = Instant::now();
    let result = http
        .post(endpoint)
        .header(ACCEPT, "application/json")
        .form(&[("grant_type", "test")])
        .send()
        .await;

    match result {
        Ok(resp) => Reachability {
            endpoint: endpoint.to_string(),
            reachable: true,
            status: Some(resp.status().as_u16()),
            response_time: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "token endpoint unreachable");
            Reachability {
                endpoint: endpoint.to_string(),
                reachable: false,
                status: None,
                response_time: None,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn diagnose(state: &AppState, headers: &HeaderMap) -> Json<serde_json::Value> {
    let app = state.config.bling.as_ref();
    let configured_redirect = app.and_then(|a| a.redirect_uri.clone());
    let expected = expected_callback(headers);

    let mut issues = Vec::new();
    if app.is_none() {
        issues.push("BLING_CLIENT_ID / BLING_CLIENT_SECRET not configured".to_string());
    }
    let callback_match = match configured_redirect.as_deref() {
        // Unset redirect is derived from the host, so it always matches.
        None => true,
        Some(configured) => match (Url::parse(configured), Url::parse(&expected)) {
            (Ok(configured), Ok(expected)) => configured == expected,
            (Err(e), _) => {
                issues.push(format!("BLING_REDIRECT_URI is not a valid URL: {}", e));
                false
            }
            (Ok(_), Err(_)) => false,
        },
    };
    if !callback_match {
        issues.push("callback URL does not match the current host".to_string());
    }

    let token_endpoint = check_reachable(state.tokens.http(), &state.config.bling_token_url).await;
    tracing::info!(issues = issues.len(), reachable = token_endpoint.reachable, "callback diagnostics");

    Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "host": request_host(headers),
        "protocol": forwarded_proto(headers),
        "environment": {
            "client_id_configured": app.is_some(),
            "client_secret_configured": app.is_some(),
            "redirect_uri_configured": configured_redirect.is_some(),
        },
        "expected_callback_url": expected,
        "current_callback_url": configured_redirect,
        "callback_match": callback_match,
        "issues": issues,
        "token_endpoint": token_endpoint,
    }))
}

async fn test_endpoints(state: &AppState) -> Json<serde_json::Value> {
    let mut endpoints: Vec<&str> = vec![state.config.bling_token_url.as_str()];
    for url in &state.config.bling_token_urls {
        if !endpoints.contains(&url.as_str()) {
            endpoints.push(url.as_str());
        }
    }

    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        results.push(check_reachable(state.tokens.http(), endpoint).await);
    }

    let recommended = results
        .iter()
        .find(|r| r.reachable && r.status.is_some_and(|s| s < 500))
        .map(|r| r.endpoint.clone())
        .unwrap_or_else(|| endpoints[0].to_string());

    Json(json!({
        "test_results": results,
        "recommended_endpoint": recommended,
    }))
}

/// Exchanges `code` with the redirect derived from the current host instead
/// of the configured one.
async fn retry_with_host_callback(
    state: &AppState,
    headers: &HeaderMap,
    code: Option<String>,
) -> Result<Response, AppError> {
    let code = required(code, "code")?;
    let app = state
        .config
        .bling
        .as_ref()
        .ok_or(AppError::NotConfigured("BLING_CLIENT_ID"))?;
    let creds = Credentials::new(
        app.client_id.clone(),
        app.client_secret.clone(),
        expected_callback(headers),
    );

    tracing::info!(redirect_uri = %creds.redirect_uri, "retrying exchange with host callback");
    let token = state
        .tokens
        .exchange(
            &state.config.bling_token_url,
            &creds,
            &code,
            CredentialPlacement::BasicHeaderWithRedirect,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "callback corrected",
        "token_data": IssuedToken::stamp(token),
        "corrected_config": {
            "redirect_uri": creds.redirect_uri,
            "client_id_configured": true,
            "client_secret_configured": true,
        },
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_expected_callback_uses_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("shop.example.com"));
        assert_eq!(expected_callback(&headers), "https://shop.example.com/callback.html");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        assert_eq!(expected_callback(&headers), "http://shop.example.com/callback.html");
    }
}
