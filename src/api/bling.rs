use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{json_body, request_host, required};
use crate::errors::AppError;
use crate::models::token::{preview, IssuedToken};
use crate::oauth::CredentialPlacement;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CodeParams {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublicConfig {
    pub client_id: String,
    pub redirect_uri: String,
}

/// GET /api/bling-config: what the browser needs to start the OAuth redirect.
/// The secret never leaves the server.
pub async fn config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PublicConfig>, AppError> {
    let creds = state.config.bling_credentials(request_host(&headers))?;
    Ok(Json(PublicConfig {
        client_id: creds.client_id,
        redirect_uri: creds.redirect_uri,
    }))
}

/// POST /api/bling-token: authorization code from the query string or a JSON body.
pub async fn exchange_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CodeParams>,
    body: Bytes,
) -> Result<Json<IssuedToken>, AppError> {
    let code = match query.code.filter(|c| !c.trim().is_empty()) {
        Some(code) => code,
        None => code_from_body(&body)?,
    };
    let creds = state.config.bling_credentials(request_host(&headers))?;

    tracing::info!(redirect_uri = %creds.redirect_uri, "exchanging Bling authorization code");
    let token = state
        .tokens
        .exchange(
            &state.config.bling_token_url,
            &creds,
            &code,
            CredentialPlacement::BasicHeader,
        )
        .await?;

    Ok(Json(IssuedToken::stamp(token)))
}

fn code_from_body(body: &[u8]) -> Result<String, AppError> {
    let params: CodeParams = json_body(body)?;
    required(params.code, "code")
}

/// GET /api/bling-token-test: exchange via the fallback prober.
pub async fn probe_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CodeParams>,
) -> Result<Json<Value>, AppError> {
    let code = required(query.code, "code")?;
    let creds = state.config.bling_credentials(request_host(&headers))?;

    let found = state.prober.probe(&creds, &code).await?;
    Ok(Json(json!({
        "success": true,
        "method": found.method,
        "attempt": found.position,
        "data": IssuedToken::stamp(found.token),
    })))
}

/// GET /api/debug-bling: every strategy, no short-circuit, raw outcomes.
pub async fn debug_endpoints(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CodeParams>,
) -> Result<Json<Value>, AppError> {
    let code = required(query.code, "code")?;
    let creds = state.config.bling_credentials(request_host(&headers))?;

    let results = state.prober.report(&creds, &code).await?;
    let successful = results.iter().filter(|r| r.success).count();
    tracing::info!(attempted = results.len(), successful, "token endpoint debug report");

    Ok(Json(json!({
        "message": "token endpoint debug report",
        "code": format!("{}...", preview(&code, 10)),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "results": results,
    })))
}
