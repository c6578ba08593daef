/// Conflict detection for collaborative editing
use serde::Serialize;

use crate::{OperationKind, SyncOperation, UserId};

/// Inserts closer than this many characters collide
pub const INSERT_PROXIMITY: usize = 2;

/// A set of operations on one path, from different users, judged incompatible
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    /// Primary (triggering) operation first, then the recent operations it collided with
    operations: Vec<SyncOperation>,

    /// Distinct users involved, in first-seen order
    users: Vec<UserId>,

    /// When the conflict was detected
    pub detected_at: chrono::DateTime<chrono::Utc>,

    pub resolved: bool,

    /// The synthesized operation, if the conflict was resolved automatically
    pub resolution: Option<SyncOperation>,
}

impl Conflict {
    /// Returns `None` for fewer than two operations, which is not a conflict
    pub fn new(operations: Vec<SyncOperation>) -> Option<Self> {
        if operations.len() < 2 {
            return None;
        }

        let mut users: Vec<UserId> = Vec::new();
        for op in &operations {
            if !users.contains(&op.user_id) {
                users.push(op.user_id.clone());
            }
        }

        Some(Self {
            operations,
            users,
            detected_at: chrono::Utc::now(),
            resolved: false,
            resolution: None,
        })
    }

    pub fn operations(&self) -> &[SyncOperation] {
        &self.operations
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    /// The triggering operation
    pub fn primary(&self) -> &SyncOperation {
        &self.operations[0]
    }

    pub fn path(&self) -> &str {
        &self.primary().path
    }

    pub fn kind(&self) -> OperationKind {
        self.primary().kind
    }

    pub(crate) fn mark_resolved(&mut self, resolution: SyncOperation) {
        self.resolved = true;
        self.resolution = Some(resolution);
    }
}

/// Determine if two operations conflict
pub fn operations_conflict(a: &SyncOperation, b: &SyncOperation) -> bool {
    if a.path != b.path {
        return false;
    }

    if a.user_id == b.user_id {
        return false;
    }

    use OperationKind::*;

    match (a.kind, b.kind) {
        // No region information: two modifies of one file always overlap
        (Modify, Modify) => true,
        (Delete, _) | (_, Delete) => true,
        (Insert, Insert) => match (a.position, b.position) {
            (Some(p1), Some(p2)) => p1.abs_diff(p2) < INSERT_PROXIMITY,
            _ => false,
        },
        _ => false,
    }
}

/// Check a new operation against the recent operations on its path
///
/// Every colliding recent operation joins one conflict, with `new_op` first.
pub fn detect_conflict(new_op: &SyncOperation, recent: &[SyncOperation]) -> Option<Conflict> {
    let colliding: Vec<SyncOperation> = recent
        .iter()
        .filter(|other| operations_conflict(new_op, other))
        .cloned()
        .collect();

    if colliding.is_empty() {
        return None;
    }

    let mut operations = Vec::with_capacity(colliding.len() + 1);
    operations.push(new_op.clone());
    operations.extend(colliding);

    Conflict::new(operations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    #[test]
    fn test_different_paths_never_conflict() {
        let pairs = [
            (
                SyncOperation::modify(alice(), "a", "x"),
                SyncOperation::modify(bob(), "b", "y"),
            ),
            (
                SyncOperation::delete(alice(), "a"),
                SyncOperation::modify(bob(), "b", "y"),
            ),
            (
                SyncOperation::insert(alice(), "a", 4, "x"),
                SyncOperation::insert(bob(), "b", 4, "y"),
            ),
        ];

        for (a, b) in &pairs {
            assert!(detect_conflict(a, std::slice::from_ref(b)).is_none());
        }
    }

    #[test]
    fn test_same_user_never_conflicts() {
        let recent = vec![
            SyncOperation::modify(alice(), "f", "one"),
            SyncOperation::delete(alice(), "f"),
            SyncOperation::insert(alice(), "f", 10, "x"),
        ];

        assert!(detect_conflict(&SyncOperation::modify(alice(), "f", "two"), &recent).is_none());
        assert!(detect_conflict(&SyncOperation::delete(alice(), "f"), &recent).is_none());
        assert!(detect_conflict(&SyncOperation::insert(alice(), "f", 10, "y"), &recent).is_none());
    }

    #[test]
    fn test_modify_modify_conflicts() {
        let base = SyncOperation::modify(alice(), "test/file.py", "original content");
        let incoming = SyncOperation::modify(bob(), "test/file.py", "modified content");

        let conflict = detect_conflict(&incoming, &[base]).unwrap();
        assert_eq!(conflict.operations().len(), 2);
        assert_eq!(conflict.users(), &[bob(), alice()]);
        assert_eq!(conflict.primary().id, incoming.id);
        assert!(!conflict.resolved);
    }

    #[test]
    fn test_delete_conflicts_with_everything() {
        let recent = vec![
            SyncOperation::modify(alice(), "f", "x"),
            SyncOperation::insert(alice(), "f", 100, "y"),
        ];
        let delete = SyncOperation::delete(bob(), "f");

        let conflict = detect_conflict(&delete, &recent).unwrap();
        assert_eq!(conflict.operations().len(), 3);
        assert_eq!(conflict.kind(), OperationKind::Delete);

        // And the other way around
        let prior_delete = SyncOperation::delete(alice(), "f");
        let insert = SyncOperation::insert(bob(), "f", 0, "z");
        assert!(detect_conflict(&insert, &[prior_delete]).is_some());
    }

    #[test]
    fn test_insert_proximity() {
        let near = SyncOperation::insert(alice(), "f", 10, "a");
        let far = SyncOperation::insert(alice(), "f", 12, "b");

        assert!(detect_conflict(&SyncOperation::insert(bob(), "f", 11, "c"), &[near.clone()]).is_some());
        assert!(detect_conflict(&SyncOperation::insert(bob(), "f", 10, "c"), &[near]).is_some());
        assert!(detect_conflict(&SyncOperation::insert(bob(), "f", 10, "c"), &[far]).is_none());
    }

    #[test]
    fn test_insert_and_modify_do_not_conflict() {
        let modify = SyncOperation::modify(alice(), "f", "x");
        let insert = SyncOperation::insert(bob(), "f", 0, "y");
        assert!(detect_conflict(&insert, &[modify]).is_none());
    }

    #[test]
    fn test_all_colliding_operations_join_one_conflict() {
        let carol = UserId::from("carol");
        let recent = vec![
            SyncOperation::modify(alice(), "f", "1"),
            SyncOperation::modify(bob(), "f", "2"),
            SyncOperation::modify(carol.clone(), "f", "3"),
            SyncOperation::modify(alice(), "g", "4"),
        ];
        let incoming = SyncOperation::modify(carol.clone(), "f", "5");

        let conflict = detect_conflict(&incoming, &recent).unwrap();
        assert_eq!(conflict.operations().len(), 3);
        assert_eq!(conflict.users(), &[carol, alice(), bob()]);
    }

    #[test]
    fn test_conflict_requires_two_operations() {
        assert!(Conflict::new(vec![SyncOperation::delete(alice(), "f")]).is_none());
        assert!(Conflict::new(Vec::new()).is_none());
    }
}
