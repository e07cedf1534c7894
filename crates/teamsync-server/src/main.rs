//! teamsync server binary.
//!
//! Reads `teamsync.toml` (or the path given with `--config`) overlaid with
//! `TEAMSYNC_*` environment variables, opens the SQLite store, and serves the
//! admin API while the scheduler keeps platform teams in line with directory
//! groups.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth.password_hash`:
//!
//! ```text
//! cargo run -p teamsync-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use teamsync_engine::Syncer;
use teamsync_entra::EntraClient;
use teamsync_grafana::GrafanaClient;
use teamsync_server::{AppState, ServerConfig, cache::ExternalCache, scheduler};
use teamsync_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Directory-to-Grafana team sync server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "teamsync.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
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

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("TEAMSYNC")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read configuration")?;

  let cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let grafana = GrafanaClient::new(&cfg.grafana).context("invalid grafana configuration")?;
  let entra = EntraClient::new(&cfg.entra).context("invalid entra configuration")?;

  let syncer = Arc::new(
    Syncer::new(store, grafana, entra, cfg.sync.policy())
      .with_auto_sync_default(cfg.sync.auto_sync)
      .with_group_filter(cfg.sync.group_filter.clone()),
  );
  let cache = Arc::new(ExternalCache::new());

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut tasks = Vec::new();

  if cfg.sync.interval_secs > 0 {
    tasks.push(tokio::spawn(scheduler::run_sync_loop(
      syncer.clone(),
      Duration::from_secs(cfg.sync.interval_secs),
      shutdown_rx.clone(),
    )));
  } else {
    warn!("sync.interval_secs is 0; scheduled sync disabled");
  }
  if cfg.sync.cache_refresh_secs > 0 {
    tasks.push(tokio::spawn(scheduler::run_cache_loop(
      syncer.clone(),
      cache.clone(),
      Duration::from_secs(cfg.sync.cache_refresh_secs),
      shutdown_rx.clone(),
    )));
  }

  if cfg.auth.is_none() {
    warn!("no auth configured; the admin API is open");
  }
  let app = teamsync_server::router(AppState {
    syncer,
    cache,
    auth: cfg.auth.clone().map(Arc::new),
  });

  let address = format!("{}:{}", cfg.host, cfg.port);
  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  tokio::spawn(async move {
    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
  });

  let mut server_shutdown = shutdown_rx;
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await
    .context("server error")?;

  for task in tasks {
    let _ = tokio::time::timeout(Duration::from_secs(10), task).await;
  }
  info!("teamsync stopped");
  Ok(())
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(error = %e, "failed to listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        warn!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
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
