use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{json_body, required};
use crate::errors::AppError;
use crate::models::headers_json;
use crate::models::token::preview;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HomologationRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// POST /api/bling-homologacao: one full compliance run. 200 with the report
/// on success, 500 with the partial log on failure.
pub async fn run(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, AppError> {
    let req: HomologationRequest = json_body(&body)?;
    let access_token = required(req.access_token, "access_token")?;

    let report = state
        .runner
        .run(&access_token, req.refresh_token.as_deref())
        .await;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectivityParams {
    #[serde(default)]
    pub access_token: Option<String>,
}

const CONNECTIVITY_PATH: &str = "/empresas/me/dados-basicos";

/// GET /api/bling-test: checks an access token against the company
/// profile endpoint and reports latency and headers.
pub async fn connectivity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectivityParams>,
) -> Response {
    let test_id = format!(
        "test_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &uuid::Uuid::new_v4().simple().to_string()[..10]
    );
    let started = Instant::now();

    let access_token = match required(params.access_token, "access_token") {
        Ok(token) => token,
        Err(e) => {
            return (
                e.status(),
                Json(json!({
                    "success": false,
                    "testId": test_id,
                    "error": e.to_string(),
                    "suggestion": "authorize the application in Bling first",
                })),
            )
                .into_response()
        }
    };

    let endpoint = format!("{}{}", state.config.bling_api_base, CONNECTIVITY_PATH);
    tracing::info!(test_id = %test_id, endpoint = %endpoint, "testing Bling connectivity");

    let result = state
        .tokens
        .http()
        .get(&endpoint)
        .header(AUTHORIZATION, format!("Bearer {}", access_token))
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(test_id = %test_id, error = %e, "connectivity test failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "testId": test_id,
                    "responseTime": started.elapsed().as_millis() as u64,
                    "error": e.to_string(),
                    "suggestions": [
                        "check the server's outbound connectivity",
                        "confirm the application credentials",
                        "try again in a few seconds",
                    ],
                })),
            )
                .into_response();
        }
    };

    let status = resp.status();
    let response_headers = headers_json(resp.headers());
    let text = match resp.text().await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(test_id = %test_id, error = %e, "could not read Bling response body");
            return unreadable(&test_id, started, format!("failed to read response body: {}", e));
        }
    };
    let response_time = started.elapsed().as_millis() as u64;

    if !status.is_success() {
        tracing::warn!(test_id = %test_id, status = status.as_u16(), "Bling rejected the access token");
        let passthrough = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return (
            passthrough,
            Json(json!({
                "success": false,
                "testId": test_id,
                "responseTime": response_time,
                "error": format!("API returned {}", status.as_u16()),
                "details": preview(&text, 2000),
                "suggestions": [
                    "check that the access token is still valid",
                    "confirm the required scopes were authorized",
                    "refresh the token if it has expired",
                ],
            })),
        )
            .into_response();
    }

    let company: Value = match serde_json::from_str(&text) {
        Ok(company) => company,
        Err(e) => {
            tracing::warn!(test_id = %test_id, error = %e, "Bling answered with a non-JSON body");
            return unreadable(
                &test_id,
                started,
                format!("invalid JSON from Bling: {}: {}", e, preview(&text, 100)),
            );
        }
    };
    let data = company.get("data").cloned().unwrap_or(Value::Null);
    tracing::info!(test_id = %test_id, response_time, "Bling connectivity confirmed");

    Json(json!({
        "success": true,
        "testId": test_id,
        "responseTime": response_time,
        "message": "connectivity with the Bling API confirmed",
        "empresaInfo": {
            "id": data.get("id"),
            "nome": data.get("nome"),
            "cnpj": data.get("cnpj"),
        },
        "apiHealth": {
            "endpoint": endpoint,
            "status": status.as_u16(),
            "headers": response_headers,
        },
    }))
    .into_response()
}

/// 502 for a 2xx whose body could not be read or parsed.
fn unreadable(test_id: &str, started: Instant, error: String) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "success": false,
            "testId": test_id,
            "responseTime": started.elapsed().as_millis() as u64,
            "error": error,
            "suggestions": [
                "check the BLING_API_BASE setting",
                "check whether Bling is under maintenance",
                "try again in a few seconds",
            ],
        })),
    )
        .into_response()
}
