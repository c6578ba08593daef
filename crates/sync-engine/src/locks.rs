/// Per-path exclusive write locks
use std::collections::HashMap;

use crate::UserId;

/// Path → holder map; a path has at most one holder
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locks: HashMap<String, UserId>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Not re-entrant: fails if anyone, including `user_id`, already holds `path`
    pub fn acquire(&mut self, path: &str, user_id: &UserId) -> bool {
        if self.locks.contains_key(path) {
            return false;
        }
        self.locks.insert(path.to_string(), user_id.clone());
        true
    }

    pub fn release(&mut self, path: &str, user_id: &UserId) -> bool {
        if self.locks.get(path) != Some(user_id) {
            return false;
        }
        self.locks.remove(path);
        true
    }

    pub fn holder(&self, path: &str) -> Option<&UserId> {
        self.locks.get(path)
    }

    /// Unlocked, or locked by `user_id`
    pub fn can_modify(&self, path: &str, user_id: &UserId) -> bool {
        match self.locks.get(path) {
            None => true,
            Some(holder) => holder == user_id,
        }
    }

    /// Release every lock held by `user_id`, returning the freed paths (sorted)
    pub fn release_all(&mut self, user_id: &UserId) -> Vec<String> {
        let mut paths: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, holder)| *holder == user_id)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();

        for path in &paths {
            self.locks.remove(path);
        }
        paths
    }

    pub fn held_by(&self, user_id: &UserId) -> Vec<String> {
        let mut paths: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, holder)| *holder == user_id)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.locks.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
