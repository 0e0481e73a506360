use std::time::Duration;

use crate::errors::AppError;

pub const DEFAULT_BLING_TOKEN_URL: &str = "https://api.bling.com.br/Api/v3/oauth/token";
pub const DEFAULT_BLING_API_BASE: &str = "https://api.bling.com.br/Api/v3";
pub const DEFAULT_ML_TOKEN_URL: &str = "https://api.mercadolibre.com/oauth/token";

/// Token hosts tried by the fallback prober, in order.
pub const DEFAULT_BLING_TOKEN_URLS: [&str; 3] = [
    "https://bling.com.br/Api/v3/oauth/token",
    "https://www.bling.com.br/Api/v3/oauth/token",
    "https://api.bling.com.br/Api/v3/oauth/token",
];

/// OAuth client credentials for one provider.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Both halves of the client pair must be present before any token call.
    pub fn ensure_usable(&self) -> Result<(), AppError> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(AppError::MissingCredentials);
        }
        Ok(())
    }
}

// Never print the secret, not even in debug output.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// The configured Bling application (id + secret, redirect optional).
#[derive(Debug, Clone)]
pub struct BlingApp {
    pub client_id: String,
    pub client_secret: String,
    /// Set via BLING_REDIRECT_URI. When absent the redirect is derived from
    /// the request host (`https://{host}/callback.html`).
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HomologationSettings {
    /// Base URL of the homologation API, e.g. `https://api.bling.com.br/Api/v3/homologacao`.
    pub base_url: String,
    /// Wall-clock budget for a whole run.
    pub budget: Duration,
    /// Mandatory pause between consecutive steps.
    pub pacing: Duration,
}

impl HomologationSettings {
    pub const DEFAULT_BUDGET: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_PACING: Duration = Duration::from_millis(2_000);
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    /// `None` when BLING_CLIENT_ID / BLING_CLIENT_SECRET are not set (dev only).
    pub bling: Option<BlingApp>,
    /// Primary token endpoint used by the exchange and diagnostics handlers.
    pub bling_token_url: String,
    /// Ordered candidate token endpoints for the fallback prober.
    /// Set via BLING_TOKEN_URLS (comma-separated).
    pub bling_token_urls: Vec<String>,
    pub bling_api_base: String,
    /// Shared secret for webhook signatures. Falls back to the client secret,
    /// which is what Bling signs with.
    pub webhook_secret: Option<String>,
    /// Accept webhooks that carry no signature. Development only.
    pub allow_unsigned_webhooks: bool,
    pub ml_token_url: String,
    pub ml_redirect_uri: Option<String>,
    /// Per-call timeout for every outbound HTTP request.
    pub http_timeout: Duration,
    pub homologation: HomologationSettings,
}

impl Config {
    /// Returns the Bling credentials for a request arriving on `host`.
    pub fn bling_credentials(&self, host: Option<&str>) -> Result<Credentials, AppError> {
        let app = self
            .bling
            .as_ref()
            .ok_or(AppError::NotConfigured("BLING_CLIENT_ID"))?;
        Ok(Credentials::new(
            app.client_id.clone(),
            app.client_secret.clone(),
            self.bling_redirect_uri(host),
        ))
    }

    pub fn bling_redirect_uri(&self, host: Option<&str>) -> String {
        self.bling
            .as_ref()
            .and_then(|app| app.redirect_uri.clone())
            .unwrap_or_else(|| callback_url("https", host, "callback.html"))
    }

    pub fn ml_redirect_uri(&self, host: Option<&str>) -> String {
        self.ml_redirect_uri
            .clone()
            .unwrap_or_else(|| callback_url("https", host, "callback-ml.html"))
    }

    /// Builds a config from an arbitrary key lookup. `load()` feeds it the
    /// process environment; tests feed it a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let env_mode = var("STOREFRONT_ENV").or_else(|| var("RUST_ENV")).unwrap_or_default();
        let production = env_mode == "production";

        let bling = match (var("BLING_CLIENT_ID"), var("BLING_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(BlingApp {
                client_id,
                client_secret,
                redirect_uri: var("BLING_REDIRECT_URI"),
            }),
            _ if production => {
                anyhow::bail!(
                    "BLING_CLIENT_ID and BLING_CLIENT_SECRET must be set when running in production"
                );
            }
            _ => {
                tracing::warn!(
                    "BLING_CLIENT_ID / BLING_CLIENT_SECRET not set; Bling OAuth routes will answer 500"
                );
                None
            }
        };

        let allow_unsigned_webhooks = var("BLING_WEBHOOK_ALLOW_UNSIGNED")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        if allow_unsigned_webhooks && production {
            anyhow::bail!("BLING_WEBHOOK_ALLOW_UNSIGNED cannot be enabled in production");
        }

        let webhook_secret = var("BLING_WEBHOOK_SECRET")
            .or_else(|| bling.as_ref().map(|app| app.client_secret.clone()));

        let bling_api_base = var("BLING_API_BASE")
            .unwrap_or_else(|| DEFAULT_BLING_API_BASE.into())
            .trim_end_matches('/')
            .to_string();

        let mut bling_token_urls = parse_list(&var("BLING_TOKEN_URLS").unwrap_or_default());
        if bling_token_urls.is_empty() {
            bling_token_urls = DEFAULT_BLING_TOKEN_URLS.iter().map(|s| s.to_string()).collect();
        }

        Ok(Config {
            port: var("STOREFRONT_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            production,
            bling,
            bling_token_url: var("BLING_TOKEN_URL").unwrap_or_else(|| DEFAULT_BLING_TOKEN_URL.into()),
            bling_token_urls,
            homologation: HomologationSettings {
                base_url: format!("{}/homologacao", bling_api_base),
                budget: var("HOMOLOGATION_BUDGET_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(HomologationSettings::DEFAULT_BUDGET),
                pacing: var("HOMOLOGATION_PACING_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(HomologationSettings::DEFAULT_PACING),
            },
            bling_api_base,
            webhook_secret,
            allow_unsigned_webhooks,
            ml_token_url: var("ML_TOKEN_URL").unwrap_or_else(|| DEFAULT_ML_TOKEN_URL.into()),
            ml_redirect_uri: var("ML_REDIRECT_URI"),
            http_timeout: var("STOREFRONT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(15)),
        })
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|key| std::env::var(key).ok())
}

/// `https://{host}/{page}`; falls back to localhost when no Host header arrived.
pub fn callback_url(scheme: &str, host: Option<&str>, page: &str) -> String {
    format!("{}://{}/{}", scheme, host.unwrap_or("localhost"), page)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
