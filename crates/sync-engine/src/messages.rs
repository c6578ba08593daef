/// User-facing descriptions of conflicts
use serde::{Deserialize, Serialize};

use crate::{Conflict, OperationKind, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A suggested action, keyed by a stable identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictAction {
    pub id: String,
    pub label: String,
}

impl ConflictAction {
    fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictMetadata {
    /// modify, delete or insert
    pub conflict_type: String,
    pub users: Vec<UserId>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleting_user: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictMessage {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub actions: Vec<ConflictAction>,
    pub metadata: ConflictMetadata,
}

impl ConflictMessage {
    pub fn action_ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.id.as_str()).collect()
    }
}

/// Describe a conflict for the people involved in it
pub fn build_message(conflict: &Conflict) -> ConflictMessage {
    match conflict.kind() {
        OperationKind::Modify => modify_message(conflict),
        OperationKind::Delete => delete_message(conflict),
        OperationKind::Insert => insert_message(conflict),
    }
}

fn metadata(conflict: &Conflict, conflict_type: &str) -> ConflictMetadata {
    ConflictMetadata {
        conflict_type: conflict_type.to_string(),
        users: conflict.users().to_vec(),
        timestamp: conflict.detected_at,
        file: conflict.path().to_string(),
        deleting_user: None,
    }
}

/// "a", "a and b", "a, b and c"
fn join_users(users: &[UserId]) -> String {
    match users {
        [] => String::new(),
        [only] => only.to_string(),
        [rest @ .., last] => {
            let rest: Vec<&str> = rest.iter().map(|u| u.as_str()).collect();
            format!("{} and {}", rest.join(", "), last)
        }
    }
}

fn modify_message(conflict: &Conflict) -> ConflictMessage {
    ConflictMessage {
        title: "Conflicting Changes Detected".to_string(),
        description: format!(
            "Multiple users ({}) have made changes to this file. \
             The system will attempt to merge these changes automatically.",
            join_users(conflict.users())
        ),
        severity: Severity::Warning,
        actions: vec![
            ConflictAction::new("accept_merge", "Accept Merged Changes"),
            ConflictAction::new("keep_mine", "Keep My Changes"),
            ConflictAction::new("keep_theirs", "Keep Their Changes"),
            ConflictAction::new("manual_resolve", "Resolve Manually"),
        ],
        metadata: metadata(conflict, "modify"),
    }
}

fn delete_message(conflict: &Conflict) -> ConflictMessage {
    let deleting_user = conflict
        .operations()
        .iter()
        .find(|op| op.kind == OperationKind::Delete)
        .map(|op| op.user_id.clone())
        .unwrap_or_else(|| conflict.primary().user_id.clone());

    let mut metadata = metadata(conflict, "delete");
    metadata.deleting_user = Some(deleting_user.clone());

    ConflictMessage {
        title: "File Deletion Conflict".to_string(),
        description: format!(
            "User {} is attempting to delete this file while other users have pending changes.",
            deleting_user
        ),
        severity: Severity::Error,
        actions: vec![
            ConflictAction::new("accept_delete", "Accept Deletion"),
            ConflictAction::new("reject_delete", "Reject Deletion"),
            ConflictAction::new("manual_resolve", "Resolve Manually"),
        ],
        metadata,
    }
}

fn insert_message(conflict: &Conflict) -> ConflictMessage {
    ConflictMessage {
        title: "Conflicting Insertions".to_string(),
        description: "Multiple users are attempting to insert content at the same location."
            .to_string(),
        severity: Severity::Warning,
        actions: vec![
            ConflictAction::new("merge_sequential", "Insert Sequentially"),
            ConflictAction::new("keep_mine", "Keep My Insert"),
            ConflictAction::new("keep_theirs", "Keep Their Insert"),
            ConflictAction::new("manual_resolve", "Resolve Manually"),
        ],
        metadata: metadata(conflict, "insert"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{detect_conflict, SyncOperation};

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    #[test]
    fn test_modify_message() {
        let conflict = detect_conflict(
            &SyncOperation::modify(bob(), "src/main.rs", "b"),
            &[SyncOperation::modify(alice(), "src/main.rs", "a")],
        )
        .unwrap();

        let message = build_message(&conflict);
        assert_eq!(message.severity, Severity::Warning);
        assert_eq!(
            message.action_ids(),
            vec!["accept_merge", "keep_mine", "keep_theirs", "manual_resolve"]
        );
        assert!(message.description.contains("bob and alice"));
        assert_eq!(message.metadata.conflict_type, "modify");
        assert_eq!(message.metadata.file, "src/main.rs");
        assert_eq!(message.metadata.users, vec![bob(), alice()]);
        assert_eq!(message.metadata.timestamp, conflict.detected_at);
    }

    #[test]
    fn test_delete_message_names_deleting_user() {
        let conflict = detect_conflict(
            &SyncOperation::modify(bob(), "f", "b"),
            &[SyncOperation::delete(alice(), "f")],
        )
        .unwrap();

        // Primary is a modify, so this is still a modify message
        assert_eq!(build_message(&conflict).severity, Severity::Warning);

        let conflict = detect_conflict(
            &SyncOperation::delete(bob(), "f"),
            &[SyncOperation::modify(alice(), "f", "a")],
        )
        .unwrap();

        let message = build_message(&conflict);
        assert_eq!(message.severity, Severity::Error);
        assert_eq!(
            message.action_ids(),
            vec!["accept_delete", "reject_delete", "manual_resolve"]
        );
        assert_eq!(message.metadata.deleting_user, Some(bob()));
        assert!(message.description.contains("User bob"));
    }

    #[test]
    fn test_insert_message() {
        let conflict = detect_conflict(
            &SyncOperation::insert(bob(), "f", 3, "b"),
            &[SyncOperation::insert(alice(), "f", 3, "a")],
        )
        .unwrap();

        let message = build_message(&conflict);
        assert_eq!(message.severity, Severity::Warning);
        assert_eq!(
            message.action_ids(),
            vec!["merge_sequential", "keep_mine", "keep_theirs", "manual_resolve"]
        );
        assert_eq!(message.metadata.conflict_type, "insert");
    }

    #[test]
    fn test_message_follows_primary_kind() {
        let cases = [
            (
                SyncOperation::modify(bob(), "f", "b"),
                SyncOperation::modify(alice(), "f", "a"),
            ),
            (
                SyncOperation::delete(bob(), "f"),
                SyncOperation::insert(alice(), "f", 0, "a"),
            ),
            (
                SyncOperation::insert(bob(), "f", 5, "b"),
                SyncOperation::insert(alice(), "f", 6, "a"),
            ),
        ];

        for (primary, recent) in cases {
            let conflict = detect_conflict(&primary, &[recent]).unwrap();
            let message = build_message(&conflict);
            assert_eq!(message.metadata.conflict_type, primary.kind.as_str());
            assert!(message.action_ids().contains(&"manual_resolve"));
        }
    }

    #[test]
    fn test_message_does_not_touch_conflict() {
        let conflict = detect_conflict(
            &SyncOperation::modify(bob(), "f", "b"),
            &[SyncOperation::modify(alice(), "f", "a")],
        )
        .unwrap();

        let _ = build_message(&conflict);
        assert!(!conflict.resolved);
        assert!(conflict.resolution.is_none());
    }

    #[test]
    fn test_join_users() {
        let carol = UserId::from("carol");
        assert_eq!(join_users(&[alice()]), "alice");
        assert_eq!(join_users(&[alice(), bob()]), "alice and bob");
        assert_eq!(join_users(&[alice(), bob(), carol]), "alice, bob and carol");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
    }
}
