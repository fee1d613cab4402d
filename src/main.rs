use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use ddhouse::config::Config;
use ddhouse::events::spawn_writer;
use ddhouse::normalize::{MappingTables, Normalizer};
use ddhouse::server::health::HealthMetrics;
use ddhouse::server::{self, AppState};
use ddhouse::sink::Forwarder;

/// Datadog-agent compatible intake that forwards normalized series to InfluxDB.
#[derive(Parser)]
#[command(name = "ddhouse", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Ingest listen address, e.g. ":8080".
    #[arg(long)]
    listen: Option<String>,

    /// Required `api_key` query value.
    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    /// Base URL of the InfluxDB HTTP API.
    #[arg(long, env = "SINK_URL")]
    sink_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("ddhouse {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(&mut cfg, &cli);
    cfg.validate().context("validating configuration")?;

    // Initialize tracing.
    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting ddhouse",
    );

    if cfg.server.api_key.is_empty() {
        tracing::warn!("API key is blank, accepting submissions without one");
    }

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(addr) = &cli.listen {
        cfg.server.addr = addr.clone();
    }
    if let Some(key) = &cli.api_key {
        cfg.server.api_key = key.clone();
    }
    if let Some(url) = &cli.sink_url {
        cfg.sink.url = url.clone();
    }
}

async fn run(cfg: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let health = Arc::new(HealthMetrics::new().context("registering metrics")?);
    let forwarder = Forwarder::new(&cfg.sink, Some(Arc::clone(&health)))?;

    if cfg.sink.bootstrap {
        match forwarder.bootstrap().await {
            Ok(outcome) => tracing::info!(
                ?outcome,
                database = %forwarder.database(),
                "sink bootstrap finished",
            ),
            Err(e) => tracing::warn!(error = %e, "sink bootstrap failed, continuing"),
        }
    }

    let (events, writer) = spawn_writer(
        cfg.events.path.clone(),
        cfg.events.queue_size,
        Some(Arc::clone(&health)),
    )?;

    let state = Arc::new(AppState {
        normalizer: Normalizer::new(MappingTables::default(), cfg.mapping.process_threshold),
        forwarder,
        events,
        health,
        api_key: cfg.server.api_key.clone(),
        max_body_size: cfg.server.max_body_size,
    });

    let bind_addr = server::bind_addr(&cfg.server.addr);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("listening on {bind_addr}"))?;

    // Returns once the signal fired and open requests finished; dropping the
    // state closes the event queue.
    server::serve(listener, state, cancel).await?;

    writer.await.context("joining event writer")?;

    tracing::info!("ddhouse stopped");

    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("received SIGINT, shutting down");
                    cancel.cancel();
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        cancel.cancel();
    });
}
