use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachetap::proxy::upstream::UpstreamClient;
use cachetap::store::CaptureStore;
use cachetap::{analyze, cli, config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cachetap=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Commands::Analyze {
            dir,
            since,
            until,
            diff,
        }) => {
            if let Some(ids) = diff {
                analyze::run_diff(&dir, &ids[0], &ids[1])
            } else {
                analyze::run_summary(&dir, since.as_deref(), until.as_deref())
            }
        }
        Some(cli::Commands::Serve { host, port }) => run_server(host, port).await,
        None => run_server(None, None).await,
    }
}

async fn run_server(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let cfg = config::load()?;
    let host = host.unwrap_or_else(|| cfg.host.clone());
    let port = port.unwrap_or(cfg.port);

    let store = CaptureStore::new(cfg.log_dir.clone());
    let upstream = UpstreamClient::new()?;
    let state = Arc::new(AppState {
        config: cfg,
        store,
        upstream,
    });

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("bind {host}:{port}"))?;
    tracing::info!("cachetap listening on {}", listener.local_addr()?);
    tracing::info!(
        "forwarding to {} (captures under {})",
        state.config.upstream_base_url,
        state.config.log_dir.display()
    );

    axum::serve(listener, cachetap::app(state)).await?;
    Ok(())
}
