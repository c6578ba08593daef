//! JSON frames exchanged with clients
//!
//! The first frame a client sends is a [`Hello`]. After that it sends
//! [`ClientMessage`]s and receives [`ServerMessage`] replies interleaved with
//! forwarded `SyncEvent`s.

use serde::{Deserialize, Serialize};
use sync_engine::{OperationId, OperationKind, RecordId, SyncOperation, UserId};

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    Acquire,
    Release,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "operation")]
    Operation(OperationFrame),

    #[serde(rename = "subscribe")]
    Subscribe { path: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { path: String },

    #[serde(rename = "lock")]
    Lock { path: String, action: LockAction },

    #[serde(rename = "flush")]
    Flush,

    #[serde(rename = "ping")]
    Ping,
}

/// An edit as a client describes it
///
/// The kind is carried as a string so unknown kinds surface as an
/// `InvalidOperation` rather than a decode failure.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationFrame {
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub position: Option<usize>,
}

impl OperationFrame {
    pub fn into_operation(self, user_id: &UserId) -> sync_engine::Result<SyncOperation> {
        let kind: OperationKind = self.kind.parse()?;
        let mut operation = SyncOperation::new(kind, self.path, user_id.clone());
        operation.content = self.content;
        operation.position = self.position;
        Ok(operation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Queued,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { user_id: UserId },

    #[serde(rename = "operation_ack")]
    OperationAck {
        status: AckStatus,
        /// The queued operation, which differs from the submitted one when a
        /// conflict was resolved
        #[serde(skip_serializing_if = "Option::is_none")]
        operation_id: Option<OperationId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conflict_id: Option<RecordId>,
        resolved_conflict: bool,
    },

    #[serde(rename = "lock_response")]
    LockResponse {
        path: String,
        action: LockAction,
        success: bool,
    },

    #[serde(rename = "subscribed")]
    Subscribed { path: String },

    #[serde(rename = "unsubscribed")]
    Unsubscribed { path: String, removed: bool },

    #[serde(rename = "flushed")]
    Flushed {
        #[serde(skip_serializing_if = "Option::is_none")]
        commit_hash: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "pong")]
    Pong,
}
