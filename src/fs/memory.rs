use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use super::{FileSystem, normalize_relative};

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// In-memory `FileSystem` for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    tree: Mutex<Tree>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tree<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        let mut guard = match self.tree.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Snapshot of every file path currently stored.
    pub fn paths(&self) -> Vec<String> {
        self.with_tree(|t| t.files.keys().cloned().collect())
    }
}

fn under(dir: &str, path: &str) -> bool {
    dir.is_empty() || path == dir || path.starts_with(&format!("{}/", dir))
}

fn add_parents(tree: &mut Tree, path: &str) {
    let mut current = String::new();
    let parts: Vec<&str> = path.split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        tree.dirs.insert(current.clone());
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn create_workspace(&self) -> Result<()> {
        Ok(())
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        let path = normalize_relative(path)?;
        self.with_tree(|t| {
            add_parents(t, &path);
            if !path.is_empty() {
                t.dirs.insert(path);
            }
        });
        Ok(())
    }

    async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        self.write_bytes(path, content.as_bytes()).await
    }

    async fn write_bytes(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = normalize_relative(path)?;
        if path.is_empty() {
            bail!("Cannot write to the workspace root");
        }
        self.with_tree(|t| {
            add_parents(t, &path);
            t.files.insert(path, content.to_vec());
        });
        Ok(())
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| anyhow!("{} is not valid UTF-8: {}", path, e))
    }

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_relative(path)?;
        self.with_tree(|t| t.files.get(&path).cloned())
            .ok_or_else(|| anyhow!("File not found: {}", path))
    }

    async fn exists(&self, path: &str) -> bool {
        let Ok(path) = normalize_relative(path) else {
            return false;
        };
        self.with_tree(|t| t.files.contains_key(&path) || t.dirs.contains(&path))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let path = normalize_relative(path)?;
        let removed = self.with_tree(|t| {
            let before = t.files.len() + t.dirs.len();
            t.files.retain(|p, _| !under(&path, p));
            t.dirs.retain(|d| !under(&path, d));
            before != t.files.len() + t.dirs.len()
        });
        if !removed {
            bail!("Path not found: {}", path);
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize_relative(dir)?;
        Ok(self.with_tree(|t| {
            t.files
                .keys()
                .filter(|p| under(&dir, p))
                .cloned()
                .collect()
        }))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let content = self.read_bytes(from).await?;
        self.write_bytes(to, &content).await
    }

    async fn cleanup(&self) -> Result<()> {
        self.with_tree(|t| {
            t.files.clear();
            t.dirs.clear();
        });
        Ok(())
    }
}
