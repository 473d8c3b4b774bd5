//! djbot - entry point
//!
//! Resolves configuration, starts the playback engine on the main runtime,
//! the HTTP control surface on its own thread, the retention janitor and,
//! unless headless, the stdin console.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use djbot::acquire::{AcquisitionTimeouts, ExternalResolver};
use djbot::api::{self, AppContext};
use djbot::janitor::{spawn_janitor, SWEEP_INTERVAL};
use djbot::playback::{Announcer, EngineOptions};
use djbot::voice::FfmpegSink;
use djbot::{console, spawn_session, SessionParts};
use djbot_common::config::{BotConfig, ConfigResolver};
use djbot_common::events::EventBus;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for djbot
#[derive(Parser, Debug)]
#[command(name = "djbot")]
#[command(about = "Single-session music bot with HTTP control")]
#[command(version)]
struct Args {
    /// Config file (overrides DJBOT_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP control port (overrides HTTP_CONTROL_PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Working directory for downloads (overrides DOWNLOAD_DIR and the config file)
    #[arg(short, long)]
    download_dir: Option<PathBuf>,

    /// Do not read commands from stdin
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigResolver::new(args.config.clone())
        .resolve()
        .context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "djbot={0},djbot_common={0},tower_http=info",
                    config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting djbot v{}", env!("CARGO_PKG_VERSION"));
    info!("Download directory: {}", config.download_dir.display());
    if config.uses_default_password() {
        warn!("HTTP control uses the default password; set HTTP_AUTH_PASS");
    }

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.download_dir.display()))?;

    let events = EventBus::default();
    let (control, engine_task) = spawn_session(SessionParts {
        sink: Arc::new(FfmpegSink::new(&config.voice)),
        resolver: Arc::new(ExternalResolver::new(&config.acquisition)),
        work_dir: config.download_dir.clone(),
        timeouts: AcquisitionTimeouts::from(&config.acquisition),
        events,
        engine: EngineOptions {
            poll_interval: Duration::from_millis(config.voice.poll_interval_ms.max(10)),
            initial_volume: f32::from(config.voice.initial_volume.min(100)) / 100.0,
        },
        announcer: config
            .announce
            .as_ref()
            .map(|a| Announcer::new(a, config.download_dir.clone())),
        default_channel: config.voice.default_channel.clone(),
    });

    api::spawn(
        AppContext {
            control: control.clone(),
        },
        config.credentials(),
        config.http_port,
    )
    .context("Failed to start HTTP control")?;

    spawn_janitor(
        control.clone(),
        config.download_dir.clone(),
        config.retention(),
        SWEEP_INTERVAL,
    );

    if !args.headless {
        let console_control = control.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = console::run(console_control, stdin, tokio::io::stdout()).await {
                warn!("Console stopped: {}", e);
            }
        });
        info!("Console ready, type 'help' for commands");
    }

    shutdown_signal().await;

    if let Err(e) = control.shutdown().await {
        warn!("Engine already stopped: {}", e);
    }
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Command-line flags win over environment and file values
fn apply_cli_overrides(config: &mut BotConfig, args: &Args) {
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(dir) = &args.download_dir {
        config.download_dir = dir.clone();
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
