use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use storefront::cli::{Cli, Commands};
use storefront::homologation::ComplianceRunner;
use storefront::{api, config, telemetry, webhook, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(port).await,
        Some(Commands::Homologate {
            access_token,
            refresh_token,
        }) => run_homologation(&access_token, refresh_token.as_deref()).await,
        Some(Commands::Sign { file, secret }) => sign_file(&file, &secret),
        None => run_server(None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    telemetry::shutdown();
    result
}

async fn run_server(port: Option<u16>) -> anyhow::Result<()> {
    let cfg = config::load()?;
    let port = port.unwrap_or(cfg.port);

    tracing::info!(
        production = cfg.production,
        bling_configured = cfg.bling.is_some(),
        token_urls = cfg.bling_token_urls.len(),
        unsigned_webhooks = cfg.allow_unsigned_webhooks,
        "configuration loaded"
    );

    let state = Arc::new(AppState::from_config(cfg)?);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("storefront gateway listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn run_homologation(access_token: &str, refresh_token: Option<&str>) -> anyhow::Result<()> {
    let cfg = config::load()?;
    let http = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(cfg.http_timeout)
        .build()?;

    let runner = ComplianceRunner::new(http, cfg.homologation.clone());
    let report = runner.run(access_token, refresh_token).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.success {
        anyhow::bail!(
            "homologation {} failed: {}",
            report.homologacao_id,
            report.error.unwrap_or_default()
        );
    }
    Ok(())
}

fn sign_file(path: &std::path::Path, secret: &str) -> anyhow::Result<()> {
    let body = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    println!("{}", webhook::sign(secret, &body));
    Ok(())
}
