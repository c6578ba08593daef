/// Events published to subscribers
use serde::{Deserialize, Serialize};

use crate::{ConflictMessage, RecordId, SyncOperation, UserId};

type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// An applied operation, carrying its assigned version
    #[serde(rename = "operation")]
    Operation(SyncOperation),

    #[serde(rename = "user_connected")]
    UserConnected {
        user_id: UserId,
        timestamp: Timestamp,
    },

    #[serde(rename = "user_disconnected")]
    UserDisconnected {
        user_id: UserId,
        timestamp: Timestamp,
    },

    #[serde(rename = "lock_acquired")]
    LockAcquired {
        path: String,
        user_id: UserId,
        timestamp: Timestamp,
    },

    #[serde(rename = "lock_released")]
    LockReleased {
        path: String,
        user_id: UserId,
        timestamp: Timestamp,
    },

    /// A conflict that could not be resolved automatically
    #[serde(rename = "conflict")]
    Conflict {
        path: String,
        users: Vec<UserId>,
        timestamp: Timestamp,
        message: ConflictMessage,
        conflict_id: RecordId,
    },

    #[serde(rename = "commit")]
    Commit {
        user_id: UserId,
        commit_hash: String,
        timestamp: Timestamp,
        files: Vec<String>,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Operation(_) => "operation",
            SyncEvent::UserConnected { .. } => "user_connected",
            SyncEvent::UserDisconnected { .. } => "user_disconnected",
            SyncEvent::LockAcquired { .. } => "lock_acquired",
            SyncEvent::LockReleased { .. } => "lock_released",
            SyncEvent::Conflict { .. } => "conflict",
            SyncEvent::Commit { .. } => "commit",
        }
    }

    /// The applied operation, if this is an operation event
    pub fn operation(&self) -> Option<&SyncOperation> {
        match self {
            SyncEvent::Operation(op) => Some(op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_event_is_flat() {
        let mut op = SyncOperation::modify(UserId::from("alice"), "f", "v1");
        op.version = Some(7);

        let json = serde_json::to_value(SyncEvent::Operation(op)).unwrap();
        assert_eq!(json["type"], "operation");
        assert_eq!(json["path"], "f");
        assert_eq!(json["version"], 7);
    }

    #[test]
    fn test_event_type_matches_tag() {
        let event = SyncEvent::LockAcquired {
            path: "f".to_string(),
            user_id: UserId::from("alice"),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());

        let decoded: SyncEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(decoded, SyncEvent::LockAcquired { .. }));
    }
}
