/// Automatic conflict resolution, one strategy per operation kind
use similar::{ChangeTag, TextDiff};
use thiserror::Error;
use tracing::{debug, error};

use crate::{Conflict, OperationId, OperationKind, SyncOperation};

#[derive(Debug, Error)]
enum ResolutionError {
    #[error("operation {0:?} has no content")]
    MissingContent(OperationId),

    #[error("operation {0:?} has no position")]
    MissingPosition(OperationId),

    #[error("merge produced no content")]
    EmptyMerge,

    #[error("conflict contains no delete operation")]
    NoDelete,
}

/// Attempt to resolve a conflict automatically
///
/// On success the conflict is marked resolved and the operation that should
/// be queued in place of the primary one is returned. Strategy errors are
/// logged and reported as `None`.
pub fn resolve_conflict(conflict: &mut Conflict) -> Option<SyncOperation> {
    let result = match conflict.kind() {
        OperationKind::Modify => resolve_modify(conflict.operations()),
        OperationKind::Delete => resolve_delete(conflict.operations()),
        OperationKind::Insert => resolve_insert(conflict.operations()),
    };

    match result {
        Ok(resolution) => {
            debug!(
                "Resolved {} conflict on {} between {} operations",
                conflict.kind(),
                conflict.path(),
                conflict.operations().len()
            );
            conflict.mark_resolved(resolution.clone());
            Some(resolution)
        }
        Err(e) => {
            error!(
                "Failed to resolve {} conflict on {}: {}",
                conflict.kind(),
                conflict.path(),
                e
            );
            None
        }
    }
}

/// Merge modify contents in timestamp order, earliest first as the base
fn resolve_modify(operations: &[SyncOperation]) -> Result<SyncOperation, ResolutionError> {
    let mut sorted: Vec<&SyncOperation> = operations.iter().collect();
    sorted.sort_by_key(|op| op.timestamp);

    let mut contents = Vec::with_capacity(sorted.len());
    for op in &sorted {
        let content = op
            .content
            .as_deref()
            .ok_or(ResolutionError::MissingContent(op.id))?;
        contents.push(content);
    }

    let merged = merge_lines(contents[0], &contents[1..]);
    if merged.is_empty() {
        return Err(ResolutionError::EmptyMerge);
    }

    Ok(SyncOperation::synthetic(
        OperationKind::Modify,
        operations[0].path.clone(),
        merged,
        None,
    ))
}

/// Destructive intent wins over in-flight edits
fn resolve_delete(operations: &[SyncOperation]) -> Result<SyncOperation, ResolutionError> {
    operations
        .iter()
        .find(|op| op.kind == OperationKind::Delete)
        .cloned()
        .ok_or(ResolutionError::NoDelete)
}

/// Lay colliding inserts out one after another
fn resolve_insert(operations: &[SyncOperation]) -> Result<SyncOperation, ResolutionError> {
    let mut placed: Vec<(usize, &SyncOperation)> = Vec::with_capacity(operations.len());
    for op in operations {
        let position = op.position.ok_or(ResolutionError::MissingPosition(op.id))?;
        placed.push((position, op));
    }
    placed.sort_by_key(|(position, op)| (*position, op.timestamp));

    let mut cursor = placed[0].0;
    let mut first_adjusted = None;
    let mut merged = String::new();

    for (position, op) in placed {
        let content = op
            .content
            .as_deref()
            .ok_or(ResolutionError::MissingContent(op.id))?;

        let adjusted = if position <= cursor { cursor + 1 } else { position };
        first_adjusted.get_or_insert(adjusted);
        merged.push_str(content);
        cursor = adjusted + content.chars().count();
    }

    // The merged text lands where the first insert ended up after adjustment
    Ok(SyncOperation::synthetic(
        OperationKind::Insert,
        operations[0].path.clone(),
        merged,
        first_adjusted,
    ))
}

/// Fold each change into the running result with a line diff,
/// keeping unchanged and added lines and dropping removed ones
pub fn merge_lines(base: &str, changes: &[&str]) -> String {
    let mut current = base.to_string();

    for change in changes {
        let next = {
            let diff = TextDiff::from_lines(current.as_str(), *change);
            let mut merged = String::with_capacity(change.len());
            for line in diff.iter_all_changes() {
                match line.tag() {
                    ChangeTag::Equal | ChangeTag::Insert => merged.push_str(line.value()),
                    ChangeTag::Delete => {}
                }
            }
            merged
        };
        current = next;
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{detect_conflict, UserId};
    use chrono::{Duration, Utc};

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    #[test]
    fn test_modify_resolution_is_synthetic() {
        let now = Utc::now();
        let first = SyncOperation::modify(alice(), "test/file.py", "first modification")
            .with_timestamp(now);
        let second = SyncOperation::modify(bob(), "test/file.py", "second modification")
            .with_timestamp(now + Duration::seconds(1));

        let mut conflict = detect_conflict(&second, &[first]).unwrap();
        let resolution = resolve_conflict(&mut conflict).unwrap();

        assert_eq!(resolution.kind, OperationKind::Modify);
        assert!(resolution.is_synthetic());
        assert_eq!(resolution.version, None);
        assert_eq!(resolution.content.as_deref(), Some("second modification"));
        assert!(conflict.resolved);
        assert_eq!(conflict.resolution.as_ref().unwrap().id, resolution.id);
    }

    #[test]
    fn test_modify_merge_follows_timestamps_not_list_order() {
        let now = Utc::now();
        let later = SyncOperation::modify(bob(), "f", "b\n").with_timestamp(now);
        let earlier = SyncOperation::modify(alice(), "f", "a\n")
            .with_timestamp(now - Duration::seconds(5));

        // `later` is the primary here; the earlier one is still the base
        let mut conflict = detect_conflict(&later, &[earlier]).unwrap();
        let resolution = resolve_conflict(&mut conflict).unwrap();
        assert_eq!(resolution.content.as_deref(), Some("b\n"));
    }

    #[test]
    fn test_merge_lines_keeps_shared_and_added_lines() {
        let base = "def hello():\n    print(\"hello\")\n";
        let change = "def hello():\n    print(\"hello\")\n    return 1\n";
        assert_eq!(merge_lines(base, &[change]), change);

        let removed = "def hello():\n";
        assert_eq!(merge_lines(base, &[removed]), "def hello():\n");
    }

    #[test]
    fn test_empty_merge_fails() {
        let now = Utc::now();
        let first = SyncOperation::modify(alice(), "f", "content").with_timestamp(now);
        let cleared =
            SyncOperation::modify(bob(), "f", "").with_timestamp(now + Duration::seconds(1));

        let mut conflict = detect_conflict(&cleared, &[first]).unwrap();
        assert!(resolve_conflict(&mut conflict).is_none());
        assert!(!conflict.resolved);
        assert!(conflict.resolution.is_none());
    }

    #[test]
    fn test_modify_against_delete_fails() {
        let delete = SyncOperation::delete(alice(), "f");
        let modify = SyncOperation::modify(bob(), "f", "still editing");

        let mut conflict = detect_conflict(&modify, &[delete]).unwrap();
        assert!(resolve_conflict(&mut conflict).is_none());
    }

    #[test]
    fn test_delete_wins_unchanged() {
        let recent = vec![
            SyncOperation::modify(alice(), "f", "modified content"),
            SyncOperation::insert(alice(), "f", 4, "x"),
        ];
        let delete = SyncOperation::delete(bob(), "f");

        let mut conflict = detect_conflict(&delete, &recent).unwrap();
        let resolution = resolve_conflict(&mut conflict).unwrap();

        assert_eq!(resolution, delete);
        assert_eq!(resolution.user_id, bob());
    }

    #[test]
    fn test_insert_resolution_concatenates_in_position_order() {
        let now = Utc::now();
        let x = SyncOperation::insert(alice(), "f", 10, "X").with_timestamp(now);
        let y = SyncOperation::insert(bob(), "f", 10, "Y")
            .with_timestamp(now + Duration::milliseconds(10));

        let mut conflict = detect_conflict(&y, &[x]).unwrap();
        let resolution = resolve_conflict(&mut conflict).unwrap();

        assert_eq!(resolution.kind, OperationKind::Insert);
        assert!(resolution.is_synthetic());
        assert_eq!(resolution.position, Some(11));
        assert_eq!(resolution.content.as_deref(), Some("XY"));
    }

    #[test]
    fn test_insert_resolution_keeps_every_character() {
        let first = SyncOperation::insert(alice(), "f", 11, "first insert");
        let second = SyncOperation::insert(bob(), "f", 10, "second insert");

        let mut conflict = detect_conflict(&first, &[second]).unwrap();
        let resolution = resolve_conflict(&mut conflict).unwrap();

        assert_eq!(resolution.position, Some(11));
        assert_eq!(
            resolution.content.as_deref(),
            Some("second insertfirst insert")
        );
    }

    #[test]
    fn test_insert_against_delete_fails() {
        let delete = SyncOperation::delete(alice(), "f");
        let insert = SyncOperation::insert(bob(), "f", 0, "text");

        let mut conflict = detect_conflict(&insert, &[delete]).unwrap();
        assert!(resolve_conflict(&mut conflict).is_none());
    }
}
