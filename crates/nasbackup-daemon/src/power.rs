//! Sleep inhibition through systemd-logind
//!
//! The controller acquires and releases by tag from synchronous code, so
//! requests go through a queue to a task that owns the inhibitor locks.
//! logind keeps a `block` inhibitor alive for as long as its file
//! descriptor stays open; releasing a tag drops the descriptor.

use std::collections::HashMap;

use anyhow::Context;
use nasbackup_core::ports::IPowerSaveBlocker;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const WHO: &str = "nasbackupd";
const WHY: &str = "Backup in progress";

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait LoginManager {
    async fn inhibit(
        &self,
        what: &str,
        who: &str,
        why: &str,
        mode: &str,
    ) -> zbus::Result<zbus::zvariant::OwnedFd>;
}

/// Held inhibitor; dropping it lifts the inhibition
pub type InhibitLock = Box<dyn Send>;

/// Source of inhibitor locks
#[async_trait::async_trait]
pub trait InhibitBackend: Send + Sync + 'static {
    async fn inhibit(&self) -> anyhow::Result<InhibitLock>;
}

struct Logind {
    proxy: LoginManagerProxy<'static>,
}

#[async_trait::async_trait]
impl InhibitBackend for Logind {
    async fn inhibit(&self) -> anyhow::Result<InhibitLock> {
        let fd = self
            .proxy
            .inhibit("sleep", WHO, WHY, "block")
            .await
            .context("logind refused the sleep inhibitor")?;
        Ok(Box::new(fd))
    }
}

#[derive(Debug)]
enum PowerRequest {
    Acquire(String),
    Release(String),
}

/// [`IPowerSaveBlocker`] that holds one inhibitor per tag
pub struct Inhibitor {
    tx: mpsc::UnboundedSender<PowerRequest>,
}

impl Inhibitor {
    /// Connects to logind on the system bus.
    pub async fn logind() -> anyhow::Result<Self> {
        let connection = zbus::Connection::system()
            .await
            .context("Failed to connect to the system bus")?;
        let proxy = LoginManagerProxy::new(&connection)
            .await
            .context("Failed to create logind proxy")?;
        info!("Sleep inhibition available through logind");
        Ok(Self::spawn(Logind { proxy }))
    }

    pub fn spawn(backend: impl InhibitBackend) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(backend, rx));
        Self { tx }
    }

    fn request(&self, request: PowerRequest) {
        if self.tx.send(request).is_err() {
            warn!("Power inhibitor task is gone");
        }
    }
}

impl IPowerSaveBlocker for Inhibitor {
    fn acquire(&self, tag: &str) {
        self.request(PowerRequest::Acquire(tag.to_string()));
    }

    fn release(&self, tag: &str) {
        self.request(PowerRequest::Release(tag.to_string()));
    }
}

async fn serve(backend: impl InhibitBackend, mut rx: mpsc::UnboundedReceiver<PowerRequest>) {
    let mut held: HashMap<String, InhibitLock> = HashMap::new();
    while let Some(request) = rx.recv().await {
        match request {
            PowerRequest::Acquire(tag) => {
                if held.contains_key(&tag) {
                    continue;
                }
                match backend.inhibit().await {
                    Ok(lock) => {
                        debug!(tag = %tag, "Sleep inhibited");
                        held.insert(tag, lock);
                    }
                    Err(e) => warn!(tag = %tag, error = %format!("{e:#}"), "Cannot inhibit sleep"),
                }
            }
            PowerRequest::Release(tag) => {
                if held.remove(&tag).is_some() {
                    debug!(tag = %tag, "Sleep inhibition released");
                }
            }
        }
    }
}

/// Used when logind is unreachable
pub struct NoPowerBlocker;

impl IPowerSaveBlocker for NoPowerBlocker {
    fn acquire(&self, tag: &str) {
        debug!(tag = %tag, "Sleep inhibition unavailable");
    }

    fn release(&self, _tag: &str) {}
}
