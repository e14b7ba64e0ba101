//! Attachment byte-fetch capability.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};

/// Fetches the raw bytes of a source attachment by key.
pub trait AttachmentFetcher: Send + Sync {
    fn fetch(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Attachments stored as files under a root directory, keyed by relative path.
#[derive(Debug, Clone)]
pub struct DirectoryAttachments {
    root: PathBuf,
}

impl DirectoryAttachments {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path, refusing keys that leave the root.
    pub fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            bail!("attachment key '{}' is outside the attachments directory", key);
        }
        Ok(self.root.join(relative))
    }
}

impl AttachmentFetcher for DirectoryAttachments {
    fn fetch(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.resolve(key)?;
        std::fs::read(&path).with_context(|| format!("reading attachment {}", path.display()))
    }
}
