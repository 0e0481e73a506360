/// HTTP client for the providers' OAuth token endpoints.
/// One request per call: retries belong to the fallback prober, not here.
use std::time::Duration;

use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use crate::config::Credentials;
use crate::errors::AppError;
use crate::models::token::{preview, TokenResponse};

/// Where the client id/secret travel in a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// `Authorization: Basic base64(id:secret)`, body holds only the grant.
    BasicHeader,
    /// `client_id` / `client_secret` as form fields.
    Body,
    /// Basic header plus `redirect_uri` in the body.
    BasicHeaderWithRedirect,
}

impl CredentialPlacement {
    pub const ALL: [CredentialPlacement; 3] = [
        CredentialPlacement::BasicHeader,
        CredentialPlacement::Body,
        CredentialPlacement::BasicHeaderWithRedirect,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CredentialPlacement::BasicHeader => "Basic Auth Header",
            CredentialPlacement::Body => "Credentials in Body",
            CredentialPlacement::BasicHeaderWithRedirect => "Basic Auth + redirect_uri",
        }
    }

    fn uses_basic(&self) -> bool {
        !matches!(self, CredentialPlacement::Body)
    }
}

#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Trades an authorization code for a token pair.
    pub async fn exchange(
        &self,
        token_url: &str,
        credentials: &Credentials,
        code: &str,
        placement: CredentialPlacement,
    ) -> Result<TokenResponse, AppError> {
        if code.trim().is_empty() {
            return Err(AppError::MissingParameter("code"));
        }
        credentials.ensure_usable()?;

        let req = self.exchange_request(token_url, credentials, code, placement);
        self.send(token_url, req).await
    }

    /// Builds the authorization-code request without sending it.
    pub fn exchange_request(
        &self,
        token_url: &str,
        credentials: &Credentials,
        code: &str,
        placement: CredentialPlacement,
    ) -> reqwest::RequestBuilder {
        let mut form = vec![("grant_type", "authorization_code"), ("code", code)];
        match placement {
            CredentialPlacement::BasicHeader => {}
            CredentialPlacement::Body => {
                form.push(("client_id", credentials.client_id.as_str()));
                form.push(("client_secret", credentials.client_secret.as_str()));
                if !credentials.redirect_uri.is_empty() {
                    form.push(("redirect_uri", credentials.redirect_uri.as_str()));
                }
            }
            CredentialPlacement::BasicHeaderWithRedirect => {
                form.push(("redirect_uri", credentials.redirect_uri.as_str()));
            }
        }

        let req = self
            .http
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(&form);
        if placement.uses_basic() {
            req.header(AUTHORIZATION, basic_auth_value(credentials))
        } else {
            req
        }
    }

    /// Trades a refresh token for a renewed access token. Credentials go in the body.
    pub async fn refresh(
        &self,
        token_url: &str,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<TokenResponse, AppError> {
        if refresh_token.trim().is_empty() {
            return Err(AppError::MissingParameter("refresh_token"));
        }
        credentials.ensure_usable()?;

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let req = self
            .http
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(&form);
        self.send(token_url, req).await
    }

    async fn send(&self, url: &str, req: reqwest::RequestBuilder) -> Result<TokenResponse, AppError> {
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(url, error = %e, "token endpoint unreachable");
            AppError::Transport(e.to_string())
        })?;

        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!(url, status = %status, body = %preview(&body, 100), "token endpoint answered");

        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        TokenResponse::from_provider_body(&body)
    }
}

pub fn basic_auth_value(creds: &Credentials) -> String {
    let raw = format!("{}:{}", creds.client_id, creds.client_secret);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}
