// Token payloads exchanged with the OAuth providers.
//
// Responses are kept verbatim: fields the providers add beyond the OAuth
// core set survive in `extra` and are echoed back to the caller.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type", deserialize_with = "token_type_or_default")]
    pub token_type: String,
    /// Providers send a number, a numeric string or `null`.
    #[serde(default, deserialize_with = "lenient_seconds", skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Mercado Livre returns a numeric user id; Bling omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn token_type_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_token_type))
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let seconds = match &value {
        Value::Null => None,
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if seconds.is_none() && !value.is_null() {
        tracing::warn!(expires_in = %value, "ignoring unreadable expires_in from provider");
    }
    Ok(seconds)
}

impl TokenResponse {
    /// Parses a 2xx provider body. A JSON object without `access_token` is
    /// reported as `TokenNotIssued` with the provider payload attached.
    pub fn from_provider_body(body: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| AppError::MalformedResponse(format!("{}: {}", e, preview(body, 100))))?;

        if !value.get("access_token").is_some_and(Value::is_string) {
            return Err(AppError::TokenNotIssued(value));
        }

        serde_json::from_value(value).map_err(|e| AppError::MalformedResponse(e.to_string()))
    }
}

/// Token handed to the browser after an exchange: provider body plus the
/// moment it was received (epoch milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub created_at: i64,
}

impl IssuedToken {
    pub fn stamp(mut token: TokenResponse) -> Self {
        // Our own receipt time replaces any provider field of the same name.
        token.extra.remove("created_at");
        Self {
            token,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Marketplace response shape: the OAuth core subset plus an RFC 3339 timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub user_id: Option<Value>,
    pub timestamp: String,
}

impl From<TokenResponse> for TokenSummary {
    fn from(t: TokenResponse) -> Self {
        Self {
            access_token: t.access_token,
            token_type: t.token_type,
            expires_in: t.expires_in,
            refresh_token: t.refresh_token,
            scope: t.scope,
            user_id: t.user_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// First `max` characters of `s`, cut on a char boundary.
pub fn preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_core_fields_and_keeps_extras() {
        let body = r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600,
                       "refresh_token":"ref","scope":"read","x_company":"acme"}"#;
        let token = TokenResponse::from_provider_body(body).unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.expires_in, Some(3600));
        assert_eq!(token.refresh_token.as_deref(), Some("ref"));
        assert_eq!(token.extra["x_company"], "acme");

        let out = serde_json::to_value(&token).unwrap();
        assert_eq!(out["x_company"], "acme");
    }

    #[test]
    fn test_missing_access_token_is_not_issued() {
        let err = TokenResponse::from_provider_body(r#"{"error":"pending"}"#).unwrap_err();
        match err {
            AppError::TokenNotIssued(details) => assert_eq!(details["error"], "pending"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        let err = TokenResponse::from_provider_body("<html>oops</html>").unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse(_)));
    }

    #[test]
    fn test_issued_token_flattens_created_at() {
        let token = TokenResponse::from_provider_body(r#"{"access_token":"a","expires_in":60}"#).unwrap();
        let issued = IssuedToken::stamp(token);
        let json = serde_json::to_value(&issued).unwrap();
        assert_eq!(json["access_token"], "a");
        assert_eq!(json["token_type"], "Bearer");
        assert!(json["created_at"].as_i64().unwrap() > 0);
        assert!(json.get("refresh_token").is_none());
    }

    #[test]
    fn test_issued_token_reads_back_as_refresh_input() {
        let body = r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600,"refresh_token":"ref"}"#;
        let issued = IssuedToken::stamp(TokenResponse::from_provider_body(body).unwrap());
        let stored = serde_json::to_string(&issued).unwrap();

        let back: IssuedToken = serde_json::from_str(&stored).unwrap();
        assert_eq!(back.token.refresh_token.as_deref(), Some("ref"));
        assert_eq!(back.created_at, issued.created_at);
    }

    #[test]
    fn test_null_expiry_still_issues_token() {
        let body = r#"{"access_token":"tok","token_type":null,"expires_in":null,"refresh_token":"ref"}"#;
        let token = TokenResponse::from_provider_body(body).unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, None);
        assert_eq!(token.refresh_token.as_deref(), Some("ref"));

        let out = serde_json::to_value(IssuedToken::stamp(token)).unwrap();
        assert!(out.get("expires_in").is_none());
    }

    #[test]
    fn test_string_expiry_is_read_as_seconds() {
        let token = TokenResponse::from_provider_body(r#"{"access_token":"tok","expires_in":"21600"}"#).unwrap();
        assert_eq!(token.expires_in, Some(21600));

        let token = TokenResponse::from_provider_body(r#"{"access_token":"tok","expires_in":"soon"}"#).unwrap();
        assert_eq!(token.expires_in, None);
    }

    #[test]
    fn test_provider_created_at_is_replaced() {
        let token = TokenResponse::from_provider_body(r#"{"access_token":"tok","expires_in":3600,"created_at":1}"#).unwrap();
        let issued = IssuedToken::stamp(token);
        assert!(!issued.token.extra.contains_key("created_at"));

        let out = serde_json::to_string(&issued).unwrap();
        assert_eq!(out.matches("\"created_at\"").count(), 1);
        let json: Value = serde_json::from_str(&out).unwrap();
        assert!(json["created_at"].as_i64().unwrap() > 1);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("açaí com granola", 4), "açaí");
        assert_eq!(preview("ok", 10), "ok");
    }
}
