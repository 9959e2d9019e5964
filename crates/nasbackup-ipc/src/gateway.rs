//! Command gateway
//!
//! Owns the process-wide [`BackupContext`] and processes inbound commands one
//! at a time. The context starts with an idle controller (no drive, no
//! roots) and swaps it out whenever a restart finds the machine's backup
//! drive.
//!
//! ## Commands
//!
//! | Command         | Effect                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `ConfigureDirs` | filters inactive dirs, then updates the controller      |
//! | `RequestReport` | returns the latest error/warning snapshot               |
//! | `RestartBackup` | looks up this machine's drive and restarts the backup   |
//! | `Execute`       | runs a named command and replies with the token         |
//! | `Login`         | restarts after the configured delay                     |
//! | `Logout`        | stops the backup immediately                            |
//! | `Status`        | returns the controller snapshot                         |

use std::{path::PathBuf, sync::Arc};

use nasbackup_core::{
    config::BackupConfig,
    domain::{BackupDirectory, BackupDrive, DrivePatch, ErrorSnapshot, RemoteEntry, RemoteId},
    ports::IRemoteDrive,
};
use nasbackup_sync::{
    BackupController, BackupDeps, BackupError, ControllerHandle, ControllerSnapshot, EventHub,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the gateway mailbox
const QUEUE_CAPACITY: usize = 32;

/// Length of the machine-id suffix stored in a drive's client block
const CLIENT_ID_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Remote request failed: {0:#}")]
    Remote(anyhow::Error),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Command gateway is not running")]
    Closed,
}

/// Commands that can be run through [`Command::Execute`]
///
/// Tagged by `name`, so unknown names fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum NamedCommand {
    CreateBackupDrive,
    UpdateBackupDrive {
        drive: RemoteId,
        #[serde(rename = "attr")]
        attrs: DrivePatch,
    },
}

#[derive(Debug, Clone)]
pub enum Command {
    ConfigureDirs {
        drive: Option<BackupDrive>,
        dirs: Vec<RemoteEntry>,
    },
    RequestReport,
    RestartBackup,
    Execute {
        token: String,
        command: NamedCommand,
    },
    Login,
    Logout,
    Status,
}

/// JSON payload of a `ConfigureDirs` call
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigureDirsPayload {
    #[serde(default)]
    pub drive: Option<BackupDrive>,
    #[serde(default)]
    pub dirs: Vec<RemoteEntry>,
}

impl From<ConfigureDirsPayload> for Command {
    fn from(payload: ConfigureDirsPayload) -> Self {
        Command::ConfigureDirs {
            drive: payload.drive,
            dirs: payload.dirs,
        }
    }
}

/// Correlated reply of an executed command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl CommandResponse {
    pub(crate) fn ok(token: String, result: serde_json::Value) -> Self {
        Self {
            token,
            error: None,
            result: Some(result),
        }
    }

    pub(crate) fn failed(token: String, error: String) -> Self {
        Self {
            token,
            error: Some(error),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", content = "payload", rename_all = "snake_case")]
pub enum Reply {
    Ack,
    Report(ErrorSnapshot),
    Command(CommandResponse),
    Status(Option<ControllerSnapshot>),
}

/// Last [`CLIENT_ID_LEN`] characters of the machine id
pub fn client_id_from_machine_id(machine_id: &str) -> String {
    let chars: Vec<char> = machine_id.trim().chars().collect();
    chars[chars.len().saturating_sub(CLIENT_ID_LEN)..]
        .iter()
        .collect()
}

/// Process-wide backup state: the current controller and how to build one
pub struct BackupContext {
    deps: BackupDeps,
    timings: BackupConfig,
    client_id: String,
    hub: Arc<EventHub>,
    controller: Option<ControllerHandle>,
}

impl BackupContext {
    /// `hub` must be the observer inside `deps`; reports are read back from it.
    pub fn new(deps: BackupDeps, timings: BackupConfig, machine_id: &str, hub: Arc<EventHub>) -> Self {
        Self {
            deps,
            timings,
            client_id: client_id_from_machine_id(machine_id),
            hub,
            controller: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn remote(&self) -> &Arc<dyn IRemoteDrive> {
        &self.deps.remote
    }

    /// Installs a started controller with no drive and no roots.
    pub fn install_idle(&mut self) -> Result<(), GatewayError> {
        self.replace_controller(None, Vec::new())
    }

    /// Shuts the current controller down and starts a fresh one.
    pub fn replace_controller(
        &mut self,
        drive: Option<BackupDrive>,
        dirs: Vec<PathBuf>,
    ) -> Result<(), GatewayError> {
        if let Some(previous) = self.controller.take() {
            let _ = previous.shutdown();
        }
        info!(
            drive = ?drive.as_ref().map(|d| d.id.as_str()),
            roots = dirs.len(),
            "Starting backup controller"
        );
        let handle =
            BackupController::spawn(drive, dirs, self.deps.clone(), self.timings.clone());
        handle.start()?;
        self.controller = Some(handle);
        Ok(())
    }

    /// Applies a new drive/roots selection, skipping deleted and disabled dirs.
    pub fn configure_dirs(
        &mut self,
        drive: Option<BackupDrive>,
        dirs: &[RemoteEntry],
    ) -> Result<(), GatewayError> {
        let roots: Vec<PathBuf> = BackupDirectory::active(dirs)
            .into_iter()
            .map(|d| d.metadata.local_path)
            .collect();
        debug!(configured = dirs.len(), active = roots.len(), "Configuring backup roots");
        match &self.controller {
            Some(controller) => Ok(controller.update_dirs(drive, roots)?),
            None => self.replace_controller(drive, roots),
        }
    }

    /// Finds this machine's backup drive and restarts the backup for it.
    ///
    /// A disabled drive gets a controller without roots. An enabled drive
    /// without active roots leaves the current controller alone.
    pub async fn start_backup(&mut self) -> Result<(), GatewayError> {
        let drives = self
            .remote()
            .list_drives()
            .await
            .map_err(GatewayError::Remote)?;
        let Some(drive) = drives.into_iter().find(|d| d.belongs_to(&self.client_id)) else {
            info!(client_id = %self.client_id, "No backup drive bound to this machine");
            return Ok(());
        };

        if drive.is_disabled() {
            info!(drive = %drive.id, "Backup is disabled for this machine");
            return self.replace_controller(Some(drive), Vec::new());
        }

        let listing = self
            .remote()
            .list_directory(&drive.id, &drive.id)
            .await
            .map_err(GatewayError::Remote)?;
        let roots: Vec<PathBuf> = BackupDirectory::active(&listing.entries)
            .into_iter()
            .map(|d| d.metadata.local_path)
            .collect();
        if roots.is_empty() {
            debug!(drive = %drive.id, "Backup drive has no active roots");
            return Ok(());
        }
        self.replace_controller(Some(drive), roots)
    }

    pub fn stop_backup(&self) {
        if let Some(controller) = &self.controller {
            if let Err(e) = controller.abort() {
                warn!(error = %e, "Failed to abort backup");
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(controller) = self.controller.take() {
            let _ = controller.shutdown();
        }
    }

    pub fn report(&self) -> ErrorSnapshot {
        self.hub.latest_report()
    }

    pub async fn status(&self) -> Option<ControllerSnapshot> {
        match &self.controller {
            Some(controller) => controller.snapshot().await.ok(),
            None => None,
        }
    }

    /// Runs a named command; failures are reported in the response.
    pub async fn execute(&mut self, token: String, command: NamedCommand) -> CommandResponse {
        info!(token = %token, command = ?command, "Executing command");
        let result = match command {
            NamedCommand::CreateBackupDrive => {
                self.remote().create_backup_drive(&self.client_id).await
            }
            NamedCommand::UpdateBackupDrive { drive, attrs } => {
                self.stop_backup();
                let result = self.remote().update_backup_drive(&drive, &attrs).await;
                if let Err(e) = self.start_backup().await {
                    warn!(error = %e, "Restart after drive update failed");
                }
                result
            }
        };
        match result.and_then(|drive| Ok(serde_json::to_value(drive)?)) {
            Ok(value) => CommandResponse::ok(token, value),
            Err(e) => {
                warn!(token = %token, error = %format!("{e:#}"), "Command failed");
                CommandResponse::failed(token, format!("{e:#}"))
            }
        }
    }
}

struct Request {
    command: Command,
    reply: Option<oneshot::Sender<Result<Reply, GatewayError>>>,
}

/// Sending side of the gateway mailbox
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Request>,
}

impl GatewayHandle {
    /// Sends a command and waits for its reply.
    pub async fn send(&self, command: Command) -> Result<Reply, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)?
    }
}

pub struct CommandGateway {
    context: BackupContext,
    rx: mpsc::Receiver<Request>,
    tx: mpsc::Sender<Request>,
    login_restart: Option<JoinHandle<()>>,
}

impl CommandGateway {
    pub fn new(context: BackupContext) -> (Self, GatewayHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let gateway = Self {
            context,
            rx,
            tx: tx.clone(),
            login_restart: None,
        };
        (gateway, GatewayHandle { tx })
    }

    /// Processes commands until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Err(e) = self.context.install_idle() {
            warn!(error = %e, "Failed to install idle controller");
        }
        info!(client_id = %self.context.client_id(), "Command gateway running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.rx.recv() => {
                    let Some(request) = request else { break };
                    let result = self.handle(request.command).await;
                    match request.reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!(error = %e, "Background command failed");
                            }
                        }
                    }
                }
            }
        }

        self.cancel_login_restart();
        self.context.shutdown();
        info!("Command gateway stopped");
    }

    async fn handle(&mut self, command: Command) -> Result<Reply, GatewayError> {
        match command {
            Command::ConfigureDirs { drive, dirs } => {
                self.context.configure_dirs(drive, &dirs)?;
                Ok(Reply::Ack)
            }
            Command::RequestReport => Ok(Reply::Report(self.context.report())),
            Command::RestartBackup => {
                self.context.start_backup().await?;
                Ok(Reply::Ack)
            }
            Command::Execute { token, command } => {
                Ok(Reply::Command(self.context.execute(token, command).await))
            }
            Command::Login => {
                self.schedule_login_restart();
                Ok(Reply::Ack)
            }
            Command::Logout => {
                info!("Session ended, stopping backup");
                self.cancel_login_restart();
                self.context.stop_backup();
                Ok(Reply::Ack)
            }
            Command::Status => Ok(Reply::Status(self.context.status().await)),
        }
    }

    fn schedule_login_restart(&mut self) {
        self.cancel_login_restart();
        let delay = self.context.timings.login_restart_delay();
        let tx = self.tx.clone();
        info!(delay_ms = self.context.timings.login_restart_delay_ms, "Session started, backup restart scheduled");
        self.login_restart = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(Request {
                    command: Command::RestartBackup,
                    reply: None,
                })
                .await;
        }));
    }

    fn cancel_login_restart(&mut self) {
        if let Some(pending) = self.login_restart.take() {
            pending.abort();
        }
    }
}
