/// Bounded per-path history of applied operations, the conflict-detection candidate set
use std::collections::VecDeque;

use crate::SyncOperation;

pub const DEFAULT_RECENT_OPS_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct RecentOperations {
    limit: usize,
    operations: VecDeque<SyncOperation>,
}

impl RecentOperations {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            operations: VecDeque::with_capacity(limit),
        }
    }

    /// Append an applied operation, evicting the oldest when over the limit
    pub fn push(&mut self, operation: SyncOperation) {
        self.operations.push_back(operation);
        while self.operations.len() > self.limit {
            self.operations.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SyncOperation> {
        self.operations.iter()
    }

    pub fn to_vec(&self) -> Vec<SyncOperation> {
        self.operations.iter().cloned().collect()
    }
}

impl Default for RecentOperations {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_OPS_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = RecentOperations::new(3);
        let user = UserId::from("alice");

        for i in 0..5 {
            window.push(SyncOperation::modify(user.clone(), "f", format!("v{}", i)));
        }

        assert_eq!(window.len(), 3);
        let contents: Vec<_> = window
            .iter()
            .map(|op| op.content.clone().unwrap())
            .collect();
        assert_eq!(contents, vec!["v2", "v3", "v4"]);
    }

    #[test]
    fn test_default_limit() {
        let mut window = RecentOperations::default();
        for _ in 0..25 {
            window.push(SyncOperation::delete(UserId::from("bob"), "f"));
        }
        assert_eq!(window.len(), DEFAULT_RECENT_OPS_LIMIT);
    }
}
