//! Endpoint naming and stale-registration cleanup

use std::env;
use std::io;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use crate::error::{HandoffError, HandoffResult};

/// A named local rendezvous point.
///
/// The name is fixed per application and identical across all of its
/// processes, so any instance can find any other. It is passed in as
/// configuration rather than compiled in, which lets tests isolate
/// themselves with unique names.
#[derive(Debug, Clone)]
pub struct Endpoint {
    name: String,
    path: PathBuf,
}

impl Endpoint {
    /// Create an endpoint for the given rendezvous name.
    ///
    /// The socket lives in `$XDG_RUNTIME_DIR` when set, scoping it to the
    /// current user session, and falls back to the system temp directory.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let dir = env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let path = dir.join(format!("{name}.sock"));
        Self { name, path }
    }

    /// The rendezvous name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The socket path backing this endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a socket file left behind by an uncleanly terminated
    /// listener.
    ///
    /// A socket that still accepts connections belongs to a live listener
    /// and is left alone; the caller's subsequent bind then reports the
    /// conflict. A refused connection means nobody is accepting and the
    /// file is leftover state, so it is unlinked. A missing file is fine.
    pub(crate) fn remove_stale(&self) -> HandoffResult<()> {
        match StdUnixStream::connect(&self.path) {
            // Live listener; not stale.
            Ok(_) => Ok(()),
            // Nothing registered under this name.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(_) => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(HandoffError::StaleEndpointRemovalFailed {
                    path: self.path.clone(),
                    source: e,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_derives_from_name() {
        let endpoint = Endpoint::new("handoff-naming-test");
        assert_eq!(endpoint.name(), "handoff-naming-test");
        assert!(
            endpoint
                .path()
                .to_string_lossy()
                .ends_with("handoff-naming-test.sock")
        );
    }

    #[test]
    fn test_same_name_resolves_to_same_path() {
        // Any instance must be able to find any other.
        let a = Endpoint::new("handoff-rendezvous");
        let b = Endpoint::new("handoff-rendezvous");
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn test_remove_stale_without_registration() {
        let endpoint = Endpoint::new(format!("handoff-nothing-here-{}", std::process::id()));
        endpoint.remove_stale().unwrap();
    }
}
