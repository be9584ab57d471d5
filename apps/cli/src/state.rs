//! JSON state file standing in for the host's durable storage
//!
//! The whole mount is loaded into a [`MemoryStorage`] before a command runs
//! and written back afterwards. Values are base64 so arbitrary bytes survive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use faunakeys_engine::MemoryStorage;
use serde::{Deserialize, Serialize};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// Location of the persisted mount
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mount; a missing file is an empty mount
    pub async fn load(&self) -> anyhow::Result<MemoryStorage> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MemoryStorage::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        let document: StateDocument = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        if document.version != STATE_VERSION {
            bail!(
                "{} has state version {}, expected {STATE_VERSION}",
                self.path.display(),
                document.version
            );
        }

        let entries = document
            .entries
            .into_iter()
            .map(|(key, value)| {
                STANDARD
                    .decode(value)
                    .map(|bytes| (key.clone(), bytes))
                    .with_context(|| format!("decoding entry '{key}'"))
            })
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

        Ok(MemoryStorage::with_entries(entries))
    }

    /// Write the mount back, replacing the file in one rename
    pub async fn save(&self, storage: &MemoryStorage) -> anyhow::Result<()> {
        let document = StateDocument {
            version: STATE_VERSION,
            entries: storage
                .snapshot()
                .into_iter()
                .map(|(key, value)| (key, STANDARD.encode(value)))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), entries = document.entries.len(), "State saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faunakeys_engine::Storage;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_file_is_empty_mount() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("absent.json"));

        let storage = state.load().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_entries_survive_save_and_load() {
        // GIVEN: A mount with a binary value and a nested path
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("state.json"));
        let storage = MemoryStorage::new();
        storage.put("config/root", b"{\"secret\":\"s\"}".to_vec()).await.unwrap();
        storage.put("wal/abc", vec![0, 159, 146, 150]).await.unwrap();

        // WHEN: It is saved and loaded again
        state.save(&storage).await.unwrap();
        let loaded = state.load().await.unwrap();

        // THEN: Every entry is intact
        assert_eq!(loaded.snapshot(), storage.snapshot());
        assert_eq!(loaded.list("wal/").await.unwrap(), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, r#"{"version": 7, "entries": {}}"#)
            .await
            .unwrap();

        let err = StateFile::new(&path).load().await.unwrap_err();
        assert!(err.to_string().contains("version 7"));
    }
}
