//! Long-term fact store, persisted as a pretty-printed JSON array
//!
//! Every access reads the whole file and every mutation rewrites it.
//! Single writer only: there is no locking, so two processes sharing one
//! file race and the last write wins.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Shown by `render` when the store holds nothing
pub const EMPTY_SENTINEL: &str = "(empty)";

/// A durable key/value personalization record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: String,
}

impl Fact {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Handle to the fact file
#[derive(Debug, Clone)]
pub struct FactStore {
    file_path: PathBuf,
}

impl FactStore {
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    /// Get the file path
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Create the file as `[]` if it is missing, so it is always there to inspect.
    pub async fn ensure_exists(&self) -> Result<()> {
        if fs::try_exists(&self.file_path).await? {
            return Ok(());
        }
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        self.save(&[]).await
    }

    /// Read all facts. Unreadable or malformed content reads as empty.
    pub async fn load(&self) -> Result<Vec<Fact>> {
        self.ensure_exists().await?;

        let content = match fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read {:?}, treating as empty: {}", self.file_path, e);
                return Ok(Vec::new());
            }
        };

        match serde_json::from_str::<Vec<Fact>>(&content) {
            Ok(facts) => Ok(facts),
            Err(e) => {
                warn!("Malformed fact store {:?}, treating as empty: {}", self.file_path, e);
                Ok(Vec::new())
            }
        }
    }

    /// Replace the stored facts with `facts`.
    ///
    /// Writes a sibling temp file and renames it over the store, so readers
    /// see either the old document or the new one.
    pub async fn save(&self, facts: &[Fact]) -> Result<()> {
        let content = serde_json::to_string_pretty(facts)?;
        let tmp_path = self.tmp_path();

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, &self.file_path).await?;
        debug!("Saved {} facts to {:?}", facts.len(), self.file_path);
        Ok(())
    }

    /// Insert or update a fact by exact key.
    ///
    /// Both sides are trimmed; an empty key or value is a no-op. Returns the
    /// fact as stored, or `None` when nothing was written.
    pub async fn upsert(&self, key: &str, value: &str) -> Result<Option<Fact>> {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Ok(None);
        }

        let mut facts = self.load().await?;
        match facts.iter_mut().find(|f| f.key == key) {
            Some(existing) => existing.value = value.to_string(),
            None => facts.push(Fact::new(key, value)),
        }
        self.save(&facts).await?;

        Ok(Some(Fact::new(key, value)))
    }

    /// Bullet list of all facts, or `(empty)`
    pub async fn render(&self) -> Result<String> {
        let facts = self.load().await?;
        Ok(render_facts(&facts))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }
}

/// `- key: value` per line, or `(empty)`
pub fn render_facts(facts: &[Fact]) -> String {
    if facts.is_empty() {
        return EMPTY_SENTINEL.to_string();
    }
    facts
        .iter()
        .map(|f| format!("- {}: {}", f.key, f.value))
        .collect::<Vec<_>>()
        .join("\n")
}
