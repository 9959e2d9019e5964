//! Power-save inhibition port

/// Keeps the system awake while a tag is held
///
/// Calls are fire-and-forget: implementations queue the request and log
/// failures instead of returning them, so a missing session bus never
/// fails a backup turn. Acquiring a held tag or releasing a free one is a
/// no-op.
pub trait IPowerSaveBlocker: Send + Sync {
    fn acquire(&self, tag: &str);
    fn release(&self, tag: &str);
}
