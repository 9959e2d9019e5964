//! NAS Backup Daemon - continuous backup of local folders to a NAS drive
//!
//! This binary runs as a systemd user service and handles:
//! - Watching the configured backup roots and uploading changes
//! - D-Bus interface for UI clients (commands in, progress signals out)
//! - Sleep inhibition while a backup turn is running
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the HTTP remote, the notify watcher, the upload task
//! factory and the logind inhibitor into a command gateway, then exposes the
//! gateway on the session bus. Every task is bound to one
//! `CancellationToken` that is triggered on SIGTERM or SIGINT.

mod power;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use nasbackup_core::{
    config::{Config, LoggingConfig},
    ports::{IPowerSaveBlocker, IRemoteDrive},
};
use nasbackup_ipc::{
    gateway::{BackupContext, Command, CommandGateway},
    service::{DbusService, DBUS_NAME},
};
use nasbackup_remote::{client::NasClient, provider::HttpRemoteDrive};
use nasbackup_sync::{task::UploadTaskFactory, watcher::FileWatcher, BackupDeps, EventHub};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::power::{Inhibitor, NoPowerBlocker};

/// Fallback source of the machine id
const MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Debug, Parser)]
#[command(name = "nasbackupd", version, about = "Continuous backup of local folders to a NAS")]
struct Args {
    /// Configuration file [default: $XDG_CONFIG_HOME/nasbackup/config.yaml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides `logging.level` (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

/// Loads the configuration and applies command line overrides.
///
/// An explicit `--config` must exist; the default path falls back to
/// built-in defaults.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json {
        config.logging.json = true;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", details.join("; "));
    }
    Ok(config)
}

/// Configured machine id, or the contents of `fallback`.
fn machine_id(configured: Option<&str>, fallback: &Path) -> Result<String> {
    if let Some(id) = configured {
        return Ok(id.trim().to_string());
    }
    let id = std::fs::read_to_string(fallback)
        .with_context(|| format!("Failed to read machine id from {}", fallback.display()))?;
    let id = id.trim();
    if id.is_empty() {
        anyhow::bail!("Machine id in {} is empty", fallback.display());
    }
    Ok(id.to_string())
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

/// Main daemon service that wires adapters, gateway and D-Bus together
struct DaemonService {
    config: Config,
    machine_id: String,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let machine_id = machine_id(
            config.remote.machine_id.as_deref(),
            Path::new(MACHINE_ID_PATH),
        )?;
        Ok(Self {
            config,
            machine_id,
            shutdown,
        })
    }

    fn remote(&self) -> Result<Arc<dyn IRemoteDrive>> {
        if self.config.remote.base_url.is_empty() {
            anyhow::bail!("remote.base_url is not configured");
        }
        let mut client =
            NasClient::new(&self.config.remote.base_url).context("Invalid remote.base_url")?;
        if let Some(token) = &self.config.remote.token {
            client = client.with_token(token.clone());
        }
        Ok(Arc::new(HttpRemoteDrive::new(client)))
    }

    async fn power() -> Arc<dyn IPowerSaveBlocker> {
        match Inhibitor::logind().await {
            Ok(inhibitor) => Arc::new(inhibitor),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Sleep inhibition disabled");
                Arc::new(NoPowerBlocker)
            }
        }
    }

    /// Runs until the shutdown token is cancelled.
    async fn run(&self) -> Result<()> {
        let remote = self.remote()?;
        let hub = Arc::new(EventHub::new());
        let deps = BackupDeps {
            remote: remote.clone(),
            tasks: Arc::new(UploadTaskFactory::new(remote)),
            watcher: Arc::new(FileWatcher::new()),
            power: Self::power().await,
            observer: hub.clone(),
        };
        let context = BackupContext::new(
            deps,
            self.config.backup.clone(),
            &self.machine_id,
            hub.clone(),
        );
        info!(client_id = %context.client_id(), "Backup context ready");

        let (gateway, handle) = CommandGateway::new(context);
        let gateway_task = tokio::spawn(gateway.run(self.shutdown.clone()));

        // Starting the service also acquires the well-known name.
        let dbus_service = DbusService::new(handle.clone(), hub);
        let (_connection, forwarder) = match dbus_service.start(self.shutdown.clone()).await {
            Ok(started) => {
                info!("D-Bus service started, acquired name {}", DBUS_NAME);
                started
            }
            Err(e) => {
                self.shutdown.cancel();
                let _ = gateway_task.await;
                let err_str = format!("{e:#}");
                if err_str.contains("already taken")
                    || err_str.contains("already owned")
                    || err_str.contains("NameTaken")
                {
                    error!(
                        "Another instance of nasbackupd is already running (D-Bus name {} is taken)",
                        DBUS_NAME
                    );
                    anyhow::bail!("Another instance of nasbackupd is already running");
                }
                return Err(e).context("Failed to start D-Bus service");
            }
        };

        if self.config.remote.token.is_some() {
            // Same path as a session start: restart once the delay has passed.
            if let Err(e) = handle.send(Command::Login).await {
                warn!(error = %e, "Failed to schedule the initial backup");
            }
        } else {
            info!("No remote token configured, waiting for a client to configure the backup");
        }

        self.shutdown.cancelled().await;
        info!("Shutting down");
        let _ = gateway_task.await;
        let _ = forwarder.await;
        Ok(())
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging);

    info!("NAS backup daemon starting (nasbackupd)");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    let result = match DaemonService::new(config, shutdown_token) {
        Ok(service) => service.run().await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(()) => info!("NAS backup daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "NAS backup daemon exiting with error"),
    }

    result
}
