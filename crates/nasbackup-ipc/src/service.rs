//! D-Bus service for the backup daemon
//!
//! Exposes the `org.nasbackup.Backup1` interface on the session bus. Method
//! calls are forwarded to the command gateway; payloads travel as JSON
//! strings in the same camelCase shape the NAS uses. Controller events are
//! re-emitted as signals by [`forward_events`].

use std::sync::Arc;

use nasbackup_core::ports::BackupEvent;
use nasbackup_sync::EventHub;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::{
    Command, CommandResponse, ConfigureDirsPayload, GatewayError, GatewayHandle, NamedCommand,
    Reply,
};

/// Well-known bus name of the daemon
pub const DBUS_NAME: &str = "org.nasbackup.Backup";

/// Object path of the backup interface
pub const DBUS_PATH: &str = "/org/nasbackup/Backup";

fn failed(e: GatewayError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn unexpected(reply: Reply) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("Unexpected gateway reply: {reply:?}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

pub struct BackupInterface {
    gateway: GatewayHandle,
}

impl BackupInterface {
    pub fn new(gateway: GatewayHandle) -> Self {
        Self { gateway }
    }

    async fn ack(&self, command: Command) -> zbus::fdo::Result<()> {
        match self.gateway.send(command).await.map_err(failed)? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[zbus::interface(name = "org.nasbackup.Backup1")]
impl BackupInterface {
    /// Replaces the backup roots
    ///
    /// Takes `{"drive": BackupDrive | null, "dirs": [RemoteEntry]}`. Deleted
    /// and disabled entries are ignored.
    async fn configure_dirs(&self, payload: String) -> zbus::fdo::Result<()> {
        let payload: ConfigureDirsPayload = serde_json::from_str(&payload)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        self.ack(payload.into()).await
    }

    /// Returns the error/warning lists of the latest turn as JSON
    async fn get_report(&self) -> zbus::fdo::Result<String> {
        match self.gateway.send(Command::RequestReport).await.map_err(failed)? {
            Reply::Report(snapshot) => to_json(&snapshot),
            other => Err(unexpected(other)),
        }
    }

    /// Looks up this machine's backup drive and restarts the backup
    async fn restart_backup(&self) -> zbus::fdo::Result<()> {
        self.ack(Command::RestartBackup).await
    }

    /// Runs a named command
    ///
    /// Always answers with `{"token", "error"?, "result"?}` so the caller can
    /// correlate the reply, including for commands it cannot decode.
    async fn execute(&self, token: String, command: String) -> zbus::fdo::Result<String> {
        let command: NamedCommand = match serde_json::from_str(&command) {
            Ok(command) => command,
            Err(e) => {
                debug!(token = %token, error = %e, "Rejected command");
                let response = CommandResponse::failed(token, format!("Invalid command: {e}"));
                return to_json(&response);
            }
        };
        match self
            .gateway
            .send(Command::Execute { token, command })
            .await
            .map_err(failed)?
        {
            Reply::Command(response) => to_json(&response),
            other => Err(unexpected(other)),
        }
    }

    /// A user session started; the backup restarts after a delay
    async fn login(&self) -> zbus::fdo::Result<()> {
        self.ack(Command::Login).await
    }

    /// The user session ended; the backup stops
    async fn logout(&self) -> zbus::fdo::Result<()> {
        self.ack(Command::Logout).await
    }

    /// Returns the controller snapshot as JSON (`null` before startup)
    async fn get_status(&self) -> zbus::fdo::Result<String> {
        match self.gateway.send(Command::Status).await.map_err(failed)? {
            Reply::Status(snapshot) => to_json(&snapshot),
            other => Err(unexpected(other)),
        }
    }

    /// Throttled progress report (JSON)
    #[zbus(signal)]
    async fn progress(signal_ctxt: &zbus::SignalContext<'_>, report: &str) -> zbus::Result<()>;

    /// Error/warning lists of the current turn (JSON)
    #[zbus(signal)]
    async fn report(signal_ctxt: &zbus::SignalContext<'_>, snapshot: &str) -> zbus::Result<()>;

    /// Top-level directories of a drive changed
    #[zbus(signal)]
    async fn drive_list_updated(
        signal_ctxt: &zbus::SignalContext<'_>,
        drive_id: &str,
    ) -> zbus::Result<()>;

    /// The set of backup roots changed
    #[zbus(signal)]
    async fn backup_root_updated(signal_ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// Usage analytics event
    #[zbus(signal)]
    async fn usage(
        signal_ctxt: &zbus::SignalContext<'_>,
        category: &str,
        action: &str,
        msg: &str,
    ) -> zbus::Result<()>;
}

async fn emit(ctxt: &zbus::SignalContext<'_>, event: &BackupEvent) -> anyhow::Result<()> {
    match event {
        BackupEvent::Progress(report) => {
            BackupInterface::progress(ctxt, &serde_json::to_string(report)?).await?
        }
        BackupEvent::Report(snapshot) => {
            BackupInterface::report(ctxt, &serde_json::to_string(snapshot)?).await?
        }
        BackupEvent::DriveListUpdated { drive_id } => {
            BackupInterface::drive_list_updated(ctxt, drive_id.as_str()).await?
        }
        BackupEvent::BackupRootUpdated => BackupInterface::backup_root_updated(ctxt).await?,
        BackupEvent::Usage(usage) => {
            BackupInterface::usage(ctxt, &usage.category, &usage.action, &usage.msg).await?
        }
    }
    Ok(())
}

/// Re-emits hub events as D-Bus signals until cancelled or the hub closes.
pub async fn forward_events(
    connection: zbus::Connection,
    mut events: broadcast::Receiver<BackupEvent>,
    shutdown: CancellationToken,
) {
    let ctxt = match zbus::SignalContext::new(&connection, DBUS_PATH) {
        Ok(ctxt) => ctxt,
        Err(e) => {
            warn!(error = %e, "Cannot create signal context");
            return;
        }
    };

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                if let Err(e) = emit(&ctxt, &event).await {
                    debug!(error = %format!("{e:#}"), "Failed to emit signal");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Signal forwarder fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Signal forwarder stopped");
}

/// Owns the session bus registration of the backup interface
pub struct DbusService {
    gateway: GatewayHandle,
    hub: Arc<EventHub>,
}

impl DbusService {
    pub fn new(gateway: GatewayHandle, hub: Arc<EventHub>) -> Self {
        Self { gateway, hub }
    }

    /// Registers the interface, claims [`DBUS_NAME`] and starts forwarding
    /// events as signals.
    ///
    /// The returned connection must be kept alive for the service to stay
    /// registered.
    ///
    /// # Errors
    /// Fails when the session bus is unavailable or the name is taken.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) -> anyhow::Result<(zbus::Connection, JoinHandle<()>)> {
        info!("Starting D-Bus service on session bus");

        // Subscribe before serving so no event between the two is lost.
        let events = self.hub.subscribe();
        let connection = zbus::connection::Builder::session()?
            .name(DBUS_NAME)?
            .serve_at(DBUS_PATH, BackupInterface::new(self.gateway.clone()))?
            .build()
            .await?;

        let forwarder = tokio::spawn(forward_events(connection.clone(), events, shutdown));

        info!(name = DBUS_NAME, path = DBUS_PATH, "D-Bus service started");
        Ok((connection, forwarder))
    }
}
