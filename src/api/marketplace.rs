//! Mercado Livre token endpoints. The storefront sends its own app
//! credentials with every call, so nothing here reads server configuration
//! except the token URL and the redirect URI.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::Deserialize;

use super::{json_body, request_host, required};
use crate::config::Credentials;
use crate::errors::AppError;
use crate::models::token::TokenSummary;
use crate::oauth::CredentialPlacement;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceTokenRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl MarketplaceTokenRequest {
    fn credentials(&self, redirect_uri: String) -> Credentials {
        Credentials::new(
            self.client_id.clone().unwrap_or_default(),
            self.client_secret.clone().unwrap_or_default(),
            redirect_uri,
        )
    }
}

/// POST /api/mercadolivre-token
pub async fn exchange_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TokenSummary>, AppError> {
    let req: MarketplaceTokenRequest = json_body(&body)?;
    let code = required(req.code.clone(), "code")?;
    let creds = req.credentials(state.config.ml_redirect_uri(request_host(&headers)));

    tracing::info!(redirect_uri = %creds.redirect_uri, "exchanging Mercado Livre authorization code");
    let token = state
        .tokens
        .exchange(&state.config.ml_token_url, &creds, &code, CredentialPlacement::Body)
        .await?;

    tracing::info!(user_id = ?token.user_id, "Mercado Livre token issued");
    Ok(Json(token.into()))
}

/// POST /api/mercadolivre-refresh
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<TokenSummary>, AppError> {
    let req: MarketplaceTokenRequest = json_body(&body)?;
    let refresh_token = required(req.refresh_token.clone(), "refresh_token")?;
    let creds = req.credentials(String::new());

    tracing::info!("renewing Mercado Livre token");
    let token = state
        .tokens
        .refresh(&state.config.ml_token_url, &creds, &refresh_token)
        .await?;

    Ok(Json(token.into()))
}
