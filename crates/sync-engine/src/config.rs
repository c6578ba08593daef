/// Coordinator configuration
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{SyncError, DEFAULT_RECENT_OPS_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Applied operations kept per path for conflict detection
    pub recent_ops_limit: usize,
    /// Accepted operations waiting for the apply loop
    pub queue_capacity: usize,
    /// Events buffered per subscriber before new ones are dropped
    pub subscriber_buffer: usize,
    /// Commits for user `u` go to `{branch_prefix}u`
    pub branch_prefix: String,
    pub commit_email_domain: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recent_ops_limit: DEFAULT_RECENT_OPS_LIMIT,
            queue_capacity: 1024,
            subscriber_buffer: 256,
            branch_prefix: "user/".to_string(),
            commit_email_domain: "localhost".to_string(),
        }
    }
}

impl SyncConfig {
    /// Read a JSON config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.recent_ops_limit == 0 {
            return Err(SyncError::Config("recent_ops_limit must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(SyncError::Config("queue_capacity must be positive".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(SyncError::Config("subscriber_buffer must be positive".to_string()));
        }
        Ok(())
    }

    pub fn branch_for(&self, user_id: &crate::UserId) -> String {
        format!("{}{}", self.branch_prefix, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::load(dir.path().join("sync.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.recent_ops_limit, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"recent_ops_limit": 3, "branch_prefix": "wip/"}"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.recent_ops_limit, 3);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.branch_for(&crate::UserId::from("bob")), "wip/bob");
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"queue_capacity": 0}"#).unwrap();

        assert!(matches!(SyncConfig::load(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(SyncConfig::load(&path).is_err());
    }
}
