//! # tallyd
//!
//! Tally broker daemon. `serve` (the default) runs the HTTP + `WebSocket`
//! gateway; `stdio` serves a single client over stdin/stdout.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_broker::{BrokerHost, ChannelMode, TransportCapabilities};
use tally_core::ModePreference;
use tally_core::logging::{LogFormat, init_subscriber};
use tally_server::rpc::handlers::register_all;
use tally_server::rpc::registry::MethodRegistry;
use tally_server::{ServerConfig, SessionFactory, StdioConfig, TallyServer, run_stdio};
use tally_settings::TallySettings;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Tally broker daemon.
#[derive(Parser, Debug)]
#[command(name = "tallyd", about = "Shared counter broker")]
struct Cli {
    /// Settings file (default: `~/.tally/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Broker mode: auto, shared or isolated.
    #[arg(long, global = true)]
    mode: Option<ModePreference>,

    /// Log level filter, e.g. `info` or `tally_broker=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve WebSocket clients over HTTP.
    Serve,
    /// Serve one client over stdin/stdout.
    Stdio,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut TallySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(mode) = self.mode {
            settings.broker.mode = mode;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }

    fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

fn resolve_settings(cli: &Cli) -> Result<TallySettings> {
    let mut settings = match &cli.settings {
        Some(path) => tally_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => tally_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn capabilities(command: Command) -> TransportCapabilities {
    match command {
        Command::Serve => TransportCapabilities::MULTIPLEXED,
        Command::Stdio => TransportCapabilities::DEDICATED,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let command = cli.command();
    let config = ServerConfig::from_settings(&settings);
    let mode = ChannelMode::detect(config.mode, capabilities(command));
    let host = BrokerHost::new(mode, config.broker_config());

    match command {
        Command::Serve => serve(config, host).await,
        Command::Stdio => stdio(&config, host).await,
    }
}

async fn serve(config: ServerConfig, host: BrokerHost) -> Result<()> {
    let metrics_handle = tally_server::metrics::install_recorder();
    let server = TallyServer::new(config, host, Some(metrics_handle));
    let (addr, handle) = server.listen().await.context("Failed to bind listener")?;
    info!(%addr, "tallyd ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    if !server.shutdown().drain(handle).await {
        warn!("some sessions were still open at exit");
    }
    info!("tallyd stopped");
    Ok(())
}

async fn stdio(config: &ServerConfig, host: BrokerHost) -> Result<()> {
    let mut registry = MethodRegistry::new();
    register_all(&mut registry);
    let sessions = SessionFactory::new(host, Arc::new(registry), config.callback_timeout);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let stdio_config = StdioConfig {
        max_line_length: config.max_message_size,
        send_queue_capacity: config.send_queue_capacity,
    };
    run_stdio(tokio::io::stdin(), tokio::io::stdout(), &sessions, stdio_config, shutdown)
        .await
        .context("stdio transport failed")
}
