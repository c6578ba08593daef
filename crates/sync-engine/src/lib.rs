/// Real-time collaborative file synchronization
/// Operation intake, conflict resolution, per-file locks and global ordering
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod operations;
pub use operations::*;

mod window;
pub use window::*;

mod locks;
pub use locks::*;

mod conflict;
pub use conflict::*;

mod resolution;
pub use resolution::*;

mod messages;
pub use messages::*;

mod events;
pub use events::*;

mod subscribers;
pub use subscribers::*;

mod store;
pub use store::*;

mod vcs;
pub use vcs::*;

mod workspace;
pub use workspace::*;

mod config;
pub use config::*;

mod metrics;
pub use metrics::*;

mod coordinator;
pub use coordinator::*;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("user already connected: {0}")]
    AlreadyConnected(UserId),

    #[error("user not connected: {0}")]
    NotConnected(UserId),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("version control error: {0}")]
    VersionControl(#[from] VcsError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("coordinator stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// User identifier
///
/// `system` is reserved for operations synthesized by conflict resolution.
/// It never appears in the connected-user registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub const SYSTEM: &'static str = "system";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved author of synthetic operations
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_user_is_reserved() {
        assert!(UserId::system().is_system());
        assert!(!UserId::from("alice").is_system());
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::from("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
    }
}
