use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("required parameter missing: {0}")]
    MissingParameter(&'static str),

    #[error("client credentials are required")]
    MissingCredentials,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Non-2xx from the provider. Status and body are passed through untouched.
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: String },

    /// 2xx from the provider without an access token in it.
    #[error("token not issued")]
    TokenNotIssued(serde_json::Value),

    #[error("upstream returned an unreadable payload: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("all methods failed")]
    AllStrategiesFailed { attempted: usize },

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingParameter(_)
            | AppError::MissingCredentials
            | AppError::InvalidBody(_)
            | AppError::TokenNotIssued(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidSignature => StatusCode::FORBIDDEN,
            AppError::NotConfigured(_)
            | AppError::Transport(_)
            | AppError::AllStrategiesFailed { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::MissingParameter(_) => "missing_parameter",
            AppError::MissingCredentials => "missing_credentials",
            AppError::InvalidBody(_) => "invalid_body",
            AppError::NotConfigured(_) => "not_configured",
            AppError::Upstream { .. } => "upstream_error",
            AppError::TokenNotIssued(_) => "token_not_issued",
            AppError::MalformedResponse(_) => "malformed_upstream_response",
            AppError::Transport(_) => "transport_error",
            AppError::AllStrategiesFailed { .. } => "all_methods_failed",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Internal(_) => "internal_server_error",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            AppError::Upstream { status, body } => {
                tracing::warn!(status, "upstream rejected request");
                json!({
                    "error": "upstream request failed",
                    "code": code,
                    "status": status,
                    "details": body,
                })
            }
            AppError::TokenNotIssued(details) => json!({
                "error": self.to_string(),
                "code": code,
                "details": details,
            }),
            AppError::AllStrategiesFailed { attempted } => {
                tracing::error!(attempted, "every token exchange strategy failed");
                json!({
                    "error": self.to_string(),
                    "code": code,
                    "message": "check the server logs for the per-strategy failures",
                })
            }
            AppError::Transport(e) => {
                tracing::error!("transport error: {}", e);
                json!({ "error": e, "code": code })
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                json!({ "error": "internal server error", "code": code })
            }
            _ => json!({ "error": self.to_string(), "code": code }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_is_400() {
        let err = AppError::MissingParameter("code");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "required parameter missing: code");
    }

    #[test]
    fn test_upstream_status_is_passed_through() {
        let err = AppError::Upstream { status: 401, body: "{\"error\":\"invalid_grant\"}".into() };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        // Non-HTTP codes can't be mirrored
        let err = AppError::Upstream { status: 42, body: String::new() };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidSignature.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Transport("dns".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::AllStrategiesFailed { attempted: 3 }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::NotConfigured("BLING_CLIENT_ID").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_upstream_body_is_untouched() {
        let raw = "<html>bad gateway</html>";
        let resp = AppError::Upstream { status: 502, body: raw.into() }.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["details"], raw);
        assert_eq!(json["status"], 502);
    }

    #[tokio::test]
    async fn test_all_methods_failed_body() {
        let resp = AppError::AllStrategiesFailed { attempted: 9 }.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "all methods failed");
    }
}
