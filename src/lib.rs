//! Storefront gateway: library crate shared by the binary and the
//! integration tests in `tests/`.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod homologation;
pub mod models;
pub mod oauth;
pub mod telemetry;
pub mod webhook;

use std::sync::Arc;

use config::Config;
use homologation::ComplianceRunner;
use oauth::{candidate_strategies, FallbackProber, TokenClient};
use webhook::{EventHandler, LoggingEventHandler, SignatureVerifier};

/// Shared application state passed to handlers. Read-only after startup.
pub struct AppState {
    pub config: Config,
    pub tokens: TokenClient,
    pub prober: FallbackProber,
    pub runner: ComplianceRunner,
    pub verifier: SignatureVerifier,
    pub events: Arc<dyn EventHandler>,
}

impl AppState {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let tokens = TokenClient::new(config.http_timeout)?;
        let prober = FallbackProber::new(tokens.clone(), candidate_strategies(&config.bling_token_urls));
        let runner = ComplianceRunner::new(tokens.http().clone(), config.homologation.clone());
        let verifier = SignatureVerifier::new(config.webhook_secret.clone(), config.allow_unsigned_webhooks);

        Ok(Self {
            config,
            tokens,
            prober,
            runner,
            verifier,
            events: Arc::new(LoggingEventHandler),
        })
    }

    /// Replaces the default logging handler for accepted webhook events.
    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }
}
