//! custody-server binary.
//!
//! Reads `custody.toml` (or the path given with `--config`) overlaid by
//! `CUSTODY_*` environment variables, opens the SQLite store, and serves the
//! custody API over HTTP. A background task expires overdue handoffs.

mod config;
mod transport;

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use custody_api::{
  AppState,
  rate_limit::PublicLimits,
};
use custody_protocol::Custody;
use custody_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{config::ServerConfig, transport::Transport};

#[derive(Parser)]
#[command(author, version, about = "Chain-of-custody handoff server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "custody.toml")]
  config: PathBuf,

  /// Run one expiry sweep against the store and exit.
  #[arg(long)]
  sweep_once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config).required(false))
    .add_source(
      ::config::Environment::with_prefix("CUSTODY")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("channels"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg.validate()?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let transport = Transport::from_url(server_cfg.notify_webhook_url.as_deref())?;
  if server_cfg.notify_webhook_url.is_none() {
    tracing::warn!("no notify_webhook_url configured; notifications will only be logged");
  }

  let custody = Arc::new(Custody::new(store, transport, server_cfg.protocol()));

  if cli.sweep_once {
    let expired = custody.expire_overdue().await.context("expiry sweep failed")?;
    tracing::info!(expired, "expiry sweep finished");
    return Ok(());
  }

  let limits = Arc::new(PublicLimits::new(&server_cfg.rate_limit()));

  if let Some(every) = server_cfg.sweep_interval() {
    tokio::spawn(sweep(Arc::clone(&custody), Arc::clone(&limits), every));
  }

  let app = custody_api::router(AppState { custody, limits }).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .await
    .context("server error")?;

  Ok(())
}

/// Periodically expire overdue handoffs and drop idle rate-limit buckets.
async fn sweep(
  custody: Arc<Custody<SqliteStore, Transport>>,
  limits: Arc<PublicLimits>,
  every: Duration,
) {
  let mut ticker = tokio::time::interval(every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  loop {
    ticker.tick().await;
    match custody.expire_overdue().await {
      Ok(0) => tracing::debug!("expiry sweep found nothing"),
      Ok(expired) => tracing::info!(expired, "expiry sweep"),
      Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
    }
    limits.prune();
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
