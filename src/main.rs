//! Relay Trust Service entry point.
//!
//! Loads config, builds `AppState`, spawns the ingestors and the cycle
//! timer, serves the read-only HTTP API, and shuts everything down
//! cleanly on Ctrl-C (or after one cycle, with `--run-once`).

use clap::Parser;
use relay_trust_service::api;
use relay_trust_service::config::Config;
use relay_trust_service::service::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "relay-trust-service")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run exactly one cycle and exit, without waiting out the minimum
    /// 300s cycle interval.
    #[arg(long)]
    run_once: bool,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config at {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    if let Err(errors) = config.validate() {
        for err in &errors {
            error!("config invalid: {err}");
        }
        std::process::exit(1);
    }

    let keys = match load_signing_keys(&config) {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "failed to load signing key");
            std::process::exit(1);
        }
    };

    let config = Arc::new(config);
    let state = AppState::build(config.clone(), keys).await?;

    let now = relay_trust_service::model::now_unix();
    let ingestors = service::spawn_ingestors(&state, now);

    if cli.run_once {
        info!("running a single cycle (--run-once)");
        service::run_cycle(&state).await?;
        ingestors.shutdown().await;
        state.store.checkpoint().await?;
        return Ok(());
    }

    let cycle_handle = {
        let state = state.clone();
        tokio::spawn(service::run_cycle_loop(state))
    };

    let bind_addr: SocketAddr = config.api.bind_addr;
    let api_state = api::ApiState::new(state.store.clone(), &config.api);
    let router = api::router(api_state, &config.api);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "serving read API");

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    if let Err(e) = server.with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "API server exited with error");
    }

    info!("shutting down");
    state.stop();

    let watchdog = tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_WATCHDOG).await;
        warn!("graceful shutdown exceeded watchdog, forcing exit");
        std::process::exit(1);
    });

    let _ = cycle_handle.await;
    ingestors.shutdown().await;
    if let Err(e) = state.store.checkpoint().await {
        warn!(error = %e, "final checkpoint failed");
    }
    watchdog.abort();

    info!("shutdown complete");
    Ok(())
}

fn load_signing_keys(config: &Config) -> anyhow::Result<Option<nostr::Keys>> {
    if !config.publishing.enabled {
        return Ok(None);
    }
    let secret = std::env::var("TRUST_SERVICE_PRIVATE_KEY")
        .map_err(|_| anyhow::anyhow!("TRUST_SERVICE_PRIVATE_KEY is not set"))?;
    let keys = nostr::Keys::parse(&secret)?;
    Ok(Some(keys))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
