//! Fallback prober for token endpoints whose host and credential convention
//! are not known ahead of time.
//!
//! Strategies are tried strictly in order. A failing strategy is logged and
//! skipped; the first 2xx wins. There is no backoff and no second attempt of
//! the same strategy: a failure here means "wrong configuration", not
//! "try again later".

use std::fmt::Display;
use std::future::Future;

use serde::Serialize;

use crate::config::Credentials;
use crate::errors::AppError;
use crate::models::headers_json;
use crate::models::token::{preview, TokenResponse};
use crate::oauth::client::{CredentialPlacement, TokenClient};

/// One (token URL, credential placement) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub token_url: String,
    pub placement: CredentialPlacement,
}

impl Strategy {
    pub fn name(&self) -> String {
        format!("{} @ {}", self.placement.label(), self.token_url)
    }

    pub async fn attempt(
        &self,
        client: &TokenClient,
        credentials: &Credentials,
        code: &str,
    ) -> Result<TokenResponse, AppError> {
        client
            .exchange(&self.token_url, credentials, code, self.placement)
            .await
    }
}

/// Every placement against every URL, URL-major.
pub fn candidate_strategies(token_urls: &[String]) -> Vec<Strategy> {
    token_urls
        .iter()
        .flat_map(|url| {
            CredentialPlacement::ALL.iter().map(move |placement| Strategy {
                token_url: url.clone(),
                placement: *placement,
            })
        })
        .collect()
}

/// Runs `attempt` over `items` in order and returns the first success along
/// with its index. On exhaustion returns every failure, in order.
pub async fn first_success<'a, I, T, E, F, Fut>(
    items: &'a [I],
    mut attempt: F,
) -> Result<(usize, &'a I, T), Vec<E>>
where
    F: FnMut(&'a I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match attempt(item).await {
            Ok(value) => return Ok((index, item, value)),
            Err(e) => {
                tracing::info!(
                    attempt = index + 1,
                    of = items.len(),
                    error = %e,
                    "strategy failed, moving to the next one"
                );
                failures.push(e);
            }
        }
    }
    Err(failures)
}

#[derive(Debug)]
pub struct ProbeSuccess {
    /// 1-based position of the winning strategy.
    pub position: usize,
    pub method: String,
    pub token: TokenResponse,
}

/// Per-strategy outcome for the debug report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptReport {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(rename = "isJSON", skip_serializing_if = "Option::is_none")]
    pub is_json: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

#[derive(Clone)]
pub struct FallbackProber {
    client: TokenClient,
    strategies: Vec<Strategy>,
}

impl FallbackProber {
    pub fn new(client: TokenClient, strategies: Vec<Strategy>) -> Self {
        Self { client, strategies }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Tries each strategy until one yields a token.
    pub async fn probe(&self, credentials: &Credentials, code: &str) -> Result<ProbeSuccess, AppError> {
        if code.trim().is_empty() {
            return Err(AppError::MissingParameter("code"));
        }
        credentials.ensure_usable()?;

        let outcome = first_success(&self.strategies, |strategy| {
            tracing::info!(method = %strategy.name(), "trying token strategy");
            strategy.attempt(&self.client, credentials, code)
        })
        .await;

        match outcome {
            Ok((index, strategy, token)) => {
                tracing::info!(method = %strategy.name(), position = index + 1, "token strategy succeeded");
                Ok(ProbeSuccess {
                    position: index + 1,
                    method: strategy.name(),
                    token,
                })
            }
            Err(failures) => Err(AppError::AllStrategiesFailed {
                attempted: failures.len(),
            }),
        }
    }

    /// Runs every strategy, without stopping at the first success, and
    /// reports what each endpoint answered.
    pub async fn report(&self, credentials: &Credentials, code: &str) -> Result<Vec<AttemptReport>, AppError> {
        if code.trim().is_empty() {
            return Err(AppError::MissingParameter("code"));
        }
        credentials.ensure_usable()?;

        let mut reports = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            reports.push(self.report_one(strategy, credentials, code).await);
        }
        Ok(reports)
    }

    async fn report_one(&self, strategy: &Strategy, credentials: &Credentials, code: &str) -> AttemptReport {
        let req = self.client.exchange_request(
            &strategy.token_url,
            credentials,
            code,
            strategy.placement,
        );

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let headers = headers_json(resp.headers());
                let (text, error) = match resp.text().await {
                    Ok(text) => (Some(text), None),
                    Err(e) => {
                        tracing::warn!(method = %strategy.name(), error = %e, "debug probe body unreadable");
                        (None, Some(format!("failed to read response body: {}", e)))
                    }
                };
                AttemptReport {
                    method: strategy.name(),
                    status: Some(status.as_u16()),
                    status_text: status.canonical_reason().map(String::from),
                    headers: Some(headers),
                    response_preview: text.as_deref().map(|t| preview(t, 500)),
                    is_json: text.as_deref().map(|t| t.starts_with('{') || t.starts_with('[')),
                    success: status.is_success() && error.is_none(),
                    error,
                }
            }
            Err(e) => {
                tracing::warn!(method = %strategy.name(), error = %e, "debug probe failed");
                AttemptReport {
                    method: strategy.name(),
                    status: None,
                    status_text: None,
                    headers: None,
                    response_preview: None,
                    is_json: None,
                    error: Some(e.to_string()),
                    success: false,
                }
            }
        }
    }
}
