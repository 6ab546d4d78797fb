//! Filesystem abstraction used by the orchestrator and modules.
//!
//! All paths are workspace-relative, `/`-separated strings. Modules never
//! touch `std::fs` or `tokio::fs` directly, which lets the same module run
//! against a real directory (`LocalFileSystem`) or an in-memory tree
//! (`MemoryFileSystem`, used for dry runs and tests).

pub mod local;
pub mod memory;

use anyhow::{Result, bail};
use async_trait::async_trait;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create the workspace root if it does not exist.
    async fn create_workspace(&self) -> Result<()>;

    async fn create_dir_all(&self, path: &str) -> Result<()>;

    /// Write a text file, creating parent directories.
    async fn write_text(&self, path: &str, content: &str) -> Result<()>;

    /// Write a binary file, creating parent directories.
    async fn write_bytes(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn read_text(&self, path: &str) -> Result<String>;

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    async fn exists(&self, path: &str) -> bool;

    /// Remove a file or a directory tree.
    async fn remove(&self, path: &str) -> Result<()>;

    /// All files under `dir` (recursively), workspace-relative and sorted.
    /// An empty `dir` lists the whole workspace.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Remove everything inside the workspace.
    async fn cleanup(&self) -> Result<()>;
}

/// Normalize a workspace-relative path, rejecting anything that could
/// escape the workspace root.
pub fn normalize_relative(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.starts_with('/') || trimmed.starts_with('\\') || trimmed.contains(':') {
        bail!("Path '{}' must be relative to the workspace", path);
    }
    let mut parts = Vec::new();
    for part in trimmed.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => bail!("Path '{}' escapes the workspace", path),
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

/// Validate a directory name used directly under a root: exactly one
/// normalized path segment.
pub fn single_segment(name: &str) -> Result<String> {
    let normalized = normalize_relative(name)?;
    if normalized.is_empty() || normalized.contains('/') {
        bail!("'{}' must be a single directory name", name);
    }
    Ok(normalized)
}
