/// The shared files operations are applied to
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::{OperationKind, SyncOperation};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("path escapes the workspace: {0}")]
    InvalidPath(String),

    #[error("operation is missing {field} for {path}")]
    Incomplete { field: &'static str, path: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    /// Apply an accepted operation to the file it targets
    async fn apply(&self, operation: &SyncOperation) -> Result<(), WorkspaceError>;
}

/// Splice `text` into `content` at a character offset, clamped to the end
fn splice(content: &str, position: usize, text: &str) -> String {
    let byte_offset = content
        .char_indices()
        .nth(position)
        .map(|(offset, _)| offset)
        .unwrap_or(content.len());

    let mut result = String::with_capacity(content.len() + text.len());
    result.push_str(&content[..byte_offset]);
    result.push_str(text);
    result.push_str(&content[byte_offset..]);
    result
}

fn required_content(operation: &SyncOperation) -> Result<&str, WorkspaceError> {
    operation
        .content
        .as_deref()
        .ok_or_else(|| WorkspaceError::Incomplete {
            field: "content",
            path: operation.path.clone(),
        })
}

fn required_position(operation: &SyncOperation) -> Result<usize, WorkspaceError> {
    operation.position.ok_or_else(|| WorkspaceError::Incomplete {
        field: "position",
        path: operation.path.clone(),
    })
}

/// In-memory file map
#[derive(Default)]
pub struct MemoryWorkspace {
    files: RwLock<HashMap<String, String>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: RwLock::new(
                files
                    .into_iter()
                    .map(|(path, content)| (path.into(), content.into()))
                    .collect(),
            ),
        }
    }

    pub fn create(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files.write().insert(path.into(), content.into());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }
}

#[async_trait::async_trait]
impl Workspace for MemoryWorkspace {
    async fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    async fn apply(&self, operation: &SyncOperation) -> Result<(), WorkspaceError> {
        let mut files = self.files.write();
        let path = &operation.path;

        match operation.kind {
            OperationKind::Modify => {
                let content = required_content(operation)?;
                files.insert(path.clone(), content.to_string());
            }
            OperationKind::Insert => {
                let text = required_content(operation)?;
                let position = required_position(operation)?;
                let current = files
                    .get_mut(path)
                    .ok_or_else(|| WorkspaceError::NotFound(path.clone()))?;
                *current = splice(current, position, text);
            }
            OperationKind::Delete => {
                files
                    .remove(path)
                    .ok_or_else(|| WorkspaceError::NotFound(path.clone()))?;
            }
        }
        Ok(())
    }
}

/// Files under a root directory
pub struct DirectoryWorkspace {
    root: PathBuf,
}

impl DirectoryWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, refusing anything outside the root
    fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let relative = Path::new(path);
        let normal = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        if path.is_empty() || !normal {
            return Err(WorkspaceError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl Workspace for DirectoryWorkspace {
    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::metadata(&full)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn apply(&self, operation: &SyncOperation) -> Result<(), WorkspaceError> {
        let full = self.resolve(&operation.path)?;

        match operation.kind {
            OperationKind::Modify => {
                let content = required_content(operation)?;
                tokio::fs::write(&full, content).await?;
            }
            OperationKind::Insert => {
                let text = required_content(operation)?;
                let position = required_position(operation)?;
                let current = tokio::fs::read_to_string(&full).await?;
                tokio::fs::write(&full, splice(&current, position, text)).await?;
            }
            OperationKind::Delete => {
                tokio::fs::remove_file(&full).await?;
            }
        }

        debug!("Applied {} to {}", operation.kind, full.display());
        Ok(())
    }
}
