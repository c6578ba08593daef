/// File edit operations
/// These operations represent edit intents submitted by users against shared files
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{SyncError, UserId};

/// Unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kinds of edits a user can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Delete,
    Modify,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
            OperationKind::Modify => "modify",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OperationKind::Insert),
            "delete" => Ok(OperationKind::Delete),
            "modify" => Ok(OperationKind::Modify),
            other => Err(SyncError::InvalidOperation(format!(
                "unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// A single edit intent against one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation ID
    pub id: OperationId,

    pub kind: OperationKind,

    /// Target file, relative to the shared workspace
    pub path: String,

    /// Payload; modify carries the full new content, insert the inserted text
    pub content: Option<String>,

    /// Character offset, used by insert
    pub position: Option<usize>,

    /// User who submitted this operation, or `system` for synthetic ones
    pub user_id: UserId,

    /// Submission time
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Global version, assigned by the coordinator at apply time
    pub version: Option<u64>,
}

impl SyncOperation {
    pub fn new(kind: OperationKind, path: impl Into<String>, user_id: UserId) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            path: path.into(),
            content: None,
            position: None,
            user_id,
            timestamp: chrono::Utc::now(),
            version: None,
        }
    }

    pub fn insert(
        user_id: UserId,
        path: impl Into<String>,
        position: usize,
        content: impl Into<String>,
    ) -> Self {
        Self::new(OperationKind::Insert, path, user_id)
            .with_position(position)
            .with_content(content)
    }

    pub fn delete(user_id: UserId, path: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, path, user_id)
    }

    pub fn modify(user_id: UserId, path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(OperationKind::Modify, path, user_id).with_content(content)
    }

    /// Operation produced by conflict resolution rather than submitted by a user
    pub(crate) fn synthetic(
        kind: OperationKind,
        path: impl Into<String>,
        content: String,
        position: Option<usize>,
    ) -> Self {
        let mut op = Self::new(kind, path, UserId::system()).with_content(content);
        op.position = position;
        op
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_timestamp(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.user_id.is_system()
    }

    pub fn is_applied(&self) -> bool {
        self.version.is_some()
    }

    /// Check the fields each kind needs before the operation enters the pipeline
    pub fn check_shape(&self) -> Result<(), SyncError> {
        if self.path.is_empty() {
            return Err(SyncError::InvalidOperation("empty path".to_string()));
        }

        match self.kind {
            OperationKind::Insert => {
                if self.position.is_none() {
                    return Err(SyncError::InvalidOperation(
                        "insert requires a position".to_string(),
                    ));
                }
                if self.content.is_none() {
                    return Err(SyncError::InvalidOperation(
                        "insert requires content".to_string(),
                    ));
                }
            }
            OperationKind::Modify => {
                if self.content.is_none() {
                    return Err(SyncError::InvalidOperation(
                        "modify requires content".to_string(),
                    ));
                }
            }
            OperationKind::Delete => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("insert".parse::<OperationKind>().unwrap(), OperationKind::Insert);
        assert_eq!("delete".parse::<OperationKind>().unwrap(), OperationKind::Delete);
        assert_eq!("modify".parse::<OperationKind>().unwrap(), OperationKind::Modify);

        let err = "rename".parse::<OperationKind>().unwrap_err();
        assert!(matches!(err, SyncError::InvalidOperation(_)));
    }

    #[test]
    fn test_new_operation_is_unversioned() {
        let op = SyncOperation::modify(UserId::from("alice"), "notes.md", "hello");
        assert!(!op.is_applied());
        assert!(!op.is_synthetic());
        assert_eq!(op.content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_synthetic_operation_author() {
        let op = SyncOperation::synthetic(OperationKind::Modify, "f", "merged".to_string(), None);
        assert!(op.is_synthetic());
        assert_eq!(op.user_id, UserId::system());
        assert_eq!(op.version, None);
    }

    #[test]
    fn test_shape_checks() {
        let alice = UserId::from("alice");

        let mut insert = SyncOperation::insert(alice.clone(), "f", 3, "x");
        assert!(insert.check_shape().is_ok());
        insert.position = None;
        assert!(insert.check_shape().is_err());

        let modify = SyncOperation::new(OperationKind::Modify, "f", alice.clone());
        assert!(modify.check_shape().is_err());

        assert!(SyncOperation::delete(alice.clone(), "f").check_shape().is_ok());
        assert!(SyncOperation::delete(alice, "").check_shape().is_err());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let op = SyncOperation::delete(UserId::from("bob"), "a.txt");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "delete");
        assert_eq!(json["user_id"], "bob");
        assert!(json["version"].is_null());
    }
}
