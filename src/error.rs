use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for handoff operations
pub type HandoffResult<T> = Result<T, HandoffError>;

/// Errors that can occur while arming the listener
///
/// Everything else is handled inside the crate: malformed messages are
/// dropped per-connection, and notifier failures collapse into a boolean
/// return.
#[derive(Error, Debug)]
pub enum HandoffError {
    /// The endpoint is already owned by another process, or the platform
    /// refused the bind. The standard recovery is to switch to the
    /// notifier role.
    #[error("failed to bind endpoint {}: {source}", .path.display())]
    BindFailed { path: PathBuf, source: io::Error },

    /// Forced cleanup of a stale endpoint registration failed. Neither
    /// role can proceed; the application should report this and exit.
    #[error("failed to remove stale endpoint {}: {source}", .path.display())]
    StaleEndpointRemovalFailed { path: PathBuf, source: io::Error },
}
