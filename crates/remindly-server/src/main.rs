mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use remindly_api::ledger::Ledger;
use remindly_api::{AppState, AppStateInner};
use remindly_gateway::dispatcher::Dispatcher;
use remindly_gateway::http::build_client;
use remindly_gateway::notifier::Notifier;
use remindly_gateway::reply::ChatCompletionReplier;

use crate::config::{MenuConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remindly=debug,tower_http=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-menu") => {
            let path = args.get(1).context("usage: remindly create-menu <menu.json>")?;
            create_menu(MenuConfig::from_env()?, Path::new(path)).await
        }
        Some(other) => anyhow::bail!("unknown command '{}'", other),
        None => serve(ServerConfig::from_env()?).await,
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let client = build_client(config.upstream_timeout).context("failed to build HTTP client")?;
    let db = remindly_db::Database::open(&config.db_path)?;

    let replier = Arc::new(ChatCompletionReplier::new(client.clone(), config.reply.clone()));
    let state: AppState = Arc::new(AppStateInner {
        ledger: Ledger::new(db),
        dispatcher: Dispatcher::with_timeout(replier, config.upstream_timeout),
        notifier: Notifier::new(client, config.wechat.clone()),
        wechat_token: config.wechat.token.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = remindly_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Remindly server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Push a custom menu definition to the provider and exit.
async fn create_menu(config: MenuConfig, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let menu: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let client = build_client(config.upstream_timeout).context("failed to build HTTP client")?;
    Notifier::new(client, config.wechat)
        .create_menu(&menu)
        .await
        .context("menu creation failed")?;

    info!("Menu created from {}", path.display());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
