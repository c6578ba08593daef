/// Version-control snapshots of committed user changes
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::{OperationKind, SyncOperation, UserId};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("change rejected: {0}")]
    Rejected(String),
}

#[async_trait::async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage the files touched by `operations`; `false` if nothing was staged
    async fn stage_changes(&self, operations: &[SyncOperation]) -> Result<bool, VcsError>;

    /// Commit staged changes onto `branch`, returning the commit hash
    /// (`None` when there was nothing to commit)
    async fn commit_changes(
        &self,
        message: &str,
        author: &UserId,
        branch: &str,
    ) -> Result<Option<String>, VcsError>;
}

/// Summarize a batch of operations as a commit message
///
/// One operation: `"Modify: notes.md"`. Several: `"modify: 2 files | insert: 1 files"`,
/// kinds in first-seen order.
pub fn commit_message(operations: &[SyncOperation]) -> String {
    if let [op] = operations {
        let name = Path::new(&op.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| op.path.clone());
        let kind = op.kind.as_str();
        let mut capitalized = kind[..1].to_uppercase();
        capitalized.push_str(&kind[1..]);
        return format!("{}: {}", capitalized, name);
    }

    let mut counts: Vec<(OperationKind, usize)> = Vec::new();
    for op in operations {
        match counts.iter_mut().find(|(kind, _)| *kind == op.kind) {
            Some((_, count)) => *count += 1,
            None => counts.push((op.kind, 1)),
        }
    }

    counts
        .iter()
        .map(|(kind, count)| format!("{}: {} files", kind, count))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub message: String,
    pub author: UserId,
    pub branch: String,
    pub files: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Records commits in memory
#[derive(Default)]
pub struct MemoryVersionControl {
    staged: Mutex<Vec<SyncOperation>>,
    commits: Mutex<Vec<CommitRecord>>,
    fail_commits: AtomicBool,
}

impl MemoryVersionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent stage and commit fail
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().clone()
    }

    fn check_available(&self) -> Result<(), VcsError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(VcsError::Rejected("version control unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VersionControl for MemoryVersionControl {
    async fn stage_changes(&self, operations: &[SyncOperation]) -> Result<bool, VcsError> {
        self.check_available()?;
        if operations.is_empty() {
            return Ok(false);
        }
        self.staged.lock().extend(operations.iter().cloned());
        Ok(true)
    }

    async fn commit_changes(
        &self,
        message: &str,
        author: &UserId,
        branch: &str,
    ) -> Result<Option<String>, VcsError> {
        self.check_available()?;

        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            return Ok(None);
        }

        let mut files: Vec<String> = Vec::new();
        for op in &staged {
            if !files.contains(&op.path) {
                files.push(op.path.clone());
            }
        }

        let hash = uuid::Uuid::new_v4().simple().to_string();
        self.commits.lock().push(CommitRecord {
            hash: hash.clone(),
            message: message.to_string(),
            author: author.clone(),
            branch: branch.to_string(),
            files,
            timestamp: chrono::Utc::now(),
        });
        Ok(Some(hash))
    }
}

/// Commits into a git repository whose working tree is the shared workspace
///
/// Commits land on `refs/heads/<branch>` without touching HEAD or the
/// working tree, so several users' branches can advance independently.
pub struct GitVersionControl {
    repo_path: PathBuf,
    email_domain: String,
    lock: tokio::sync::Mutex<()>,
}

impl GitVersionControl {
    pub fn open(repo_path: impl AsRef<Path>) -> Result<Self, VcsError> {
        let repo_path = repo_path.as_ref().to_path_buf();
        git2::Repository::open(&repo_path)?;
        Ok(Self {
            repo_path,
            email_domain: "localhost".to_string(),
            lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Open the repository at `repo_path`, creating it if needed
    pub fn open_or_init(repo_path: impl AsRef<Path>) -> Result<Self, VcsError> {
        let repo_path = repo_path.as_ref();
        if git2::Repository::open(repo_path).is_err() {
            git2::Repository::init(repo_path)?;
        }
        Self::open(repo_path)
    }

    pub fn with_email_domain(mut self, domain: impl Into<String>) -> Self {
        self.email_domain = domain.into();
        self
    }
}

#[async_trait::async_trait]
impl VersionControl for GitVersionControl {
    async fn stage_changes(&self, operations: &[SyncOperation]) -> Result<bool, VcsError> {
        let _guard = self.lock.lock().await;

        let mut paths: Vec<String> = Vec::new();
        for op in operations {
            if !paths.contains(&op.path) {
                paths.push(op.path.clone());
            }
        }
        if paths.is_empty() {
            return Ok(false);
        }

        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, VcsError> {
            let repo = git2::Repository::open(&repo_path)?;
            let mut index = repo.index()?;

            // Stage whatever the working tree now holds for each touched path
            for path in &paths {
                let relative = Path::new(path);
                if repo_path.join(relative).is_file() {
                    index.add_path(relative)?;
                } else if index.get_path(relative, 0).is_some() {
                    index.remove_path(relative)?;
                }
            }

            index.write()?;
            debug!("Staged {} paths in {}", paths.len(), repo_path.display());
            Ok(true)
        })
        .await
        .map_err(|e| VcsError::Task(e.to_string()))?
    }

    async fn commit_changes(
        &self,
        message: &str,
        author: &UserId,
        branch: &str,
    ) -> Result<Option<String>, VcsError> {
        let _guard = self.lock.lock().await;

        let repo_path = self.repo_path.clone();
        let message = message.to_string();
        let name = author.to_string();
        let email = format!("{}@{}", author, self.email_domain);
        let refname = format!("refs/heads/{}", branch);

        tokio::task::spawn_blocking(move || -> Result<Option<String>, VcsError> {
            let repo = git2::Repository::open(&repo_path)?;
            let mut index = repo.index()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;

            let parent = match repo.find_reference(&refname) {
                Ok(reference) => Some(reference.peel_to_commit()?),
                Err(_) => repo.head().ok().and_then(|head| head.peel_to_commit().ok()),
            };

            if let Some(parent) = &parent {
                if parent.tree_id() == tree_id {
                    return Ok(None);
                }
            }

            let signature = git2::Signature::now(&name, &email)?;
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            let oid = repo.commit(
                Some(refname.as_str()),
                &signature,
                &signature,
                &message,
                &tree,
                &parents,
            )?;

            Ok(Some(oid.to_string()))
        })
        .await
        .map_err(|e| VcsError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    #[test]
    fn test_commit_message_single_operation() {
        let ops = vec![SyncOperation::modify(alice(), "src/notes.md", "x")];
        assert_eq!(commit_message(&ops), "Modify: notes.md");

        let ops = vec![SyncOperation::delete(alice(), "old.txt")];
        assert_eq!(commit_message(&ops), "Delete: old.txt");
    }

    #[test]
    fn test_commit_message_summary() {
        let ops = vec![
            SyncOperation::modify(alice(), "a", "x"),
            SyncOperation::insert(alice(), "b", 0, "y"),
            SyncOperation::modify(alice(), "c", "z"),
        ];
        assert_eq!(commit_message(&ops), "modify: 2 files | insert: 1 files");
    }

    #[tokio::test]
    async fn test_memory_version_control() {
        let vcs = MemoryVersionControl::new();
        let ops = vec![
            SyncOperation::modify(alice(), "a", "x"),
            SyncOperation::modify(alice(), "a", "y"),
        ];

        assert!(!vcs.stage_changes(&[]).await.unwrap());
        assert!(vcs.stage_changes(&ops).await.unwrap());

        let hash = vcs
            .commit_changes("modify: 2 files", &alice(), "user/alice")
            .await
            .unwrap()
            .unwrap();

        let commits = vcs.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].hash, hash);
        assert_eq!(commits[0].files, vec!["a"]);
        assert_eq!(commits[0].branch, "user/alice");

        // Nothing left staged
        assert!(vcs
            .commit_changes("again", &alice(), "user/alice")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_memory_version_control_failure() {
        let vcs = MemoryVersionControl::new();
        vcs.set_fail_commits(true);

        let ops = vec![SyncOperation::modify(alice(), "a", "x")];
        assert!(vcs.stage_changes(&ops).await.is_err());
    }

    #[tokio::test]
    async fn test_git_commit_onto_user_branch() {
        let dir = tempdir().unwrap();
        let vcs = GitVersionControl::open_or_init(dir.path()).unwrap();

        std::fs::write(dir.path().join("notes.md"), "hello\n").unwrap();
        let ops = vec![SyncOperation::modify(alice(), "notes.md", "hello\n")];

        assert!(vcs.stage_changes(&ops).await.unwrap());
        let hash = vcs
            .commit_changes(&commit_message(&ops), &alice(), "user/alice")
            .await
            .unwrap()
            .expect("first commit has changes");

        let repo = git2::Repository::open(dir.path()).unwrap();
        let branch = repo.find_reference("refs/heads/user/alice").unwrap();
        let commit = branch.peel_to_commit().unwrap();
        assert_eq!(commit.id().to_string(), hash);
        assert_eq!(commit.message(), Some("Modify: notes.md"));
        assert_eq!(commit.author().name(), Some("alice"));

        // Same tree again: nothing to commit
        assert!(vcs.stage_changes(&ops).await.unwrap());
        assert!(vcs
            .commit_changes("noop", &alice(), "user/alice")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_git_stages_deletions() {
        let dir = tempdir().unwrap();
        let vcs = GitVersionControl::open_or_init(dir.path()).unwrap();
        let file = dir.path().join("gone.txt");

        std::fs::write(&file, "temporary").unwrap();
        let create = vec![SyncOperation::modify(alice(), "gone.txt", "temporary")];
        vcs.stage_changes(&create).await.unwrap();
        vcs.commit_changes("add", &alice(), "user/alice")
            .await
            .unwrap();

        std::fs::remove_file(&file).unwrap();
        let delete = vec![SyncOperation::delete(alice(), "gone.txt")];
        vcs.stage_changes(&delete).await.unwrap();
        let hash = vcs
            .commit_changes("remove", &alice(), "user/alice")
            .await
            .unwrap();
        assert!(hash.is_some());

        let repo = git2::Repository::open(dir.path()).unwrap();
        let index = repo.index().unwrap();
        assert!(index.get_path(Path::new("gone.txt"), 0).is_none());
    }
}
