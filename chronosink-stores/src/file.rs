// Copyright 2025 Chronosink Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! File-backed offset store.
//!
//! All offsets live in one JSON object, `{"source": offset, ...}`. Every change
//! writes the whole object to a sibling temporary file, syncs it and renames it
//! over the original, so a crash leaves either the old or the new contents and
//! never a torn file.
//!
//! # Example
//!
//! ```rust,no_run
//! use chronosink_stores::file::FileOffsetStore;
//! use chronosink_core::offset::OffsetStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileOffsetStore::open("/var/lib/chronosink/offsets.json").await?;
//!
//! let resume_from = store.get_offset("orders.jsonl").await?.unwrap_or(0);
//! println!("resuming at event {resume_from}");
//! # Ok(())
//! # }
//! ```

use chronosink_core::offset::{OffsetStore, OffsetStoreError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Offset store persisted to a single JSON file.
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    // Held across the file write so saves are applied in order.
    offsets: Mutex<BTreeMap<String, u64>>,
}

impl FileOffsetStore {
    /// Opens the store at `path`, loading existing offsets.
    ///
    /// A missing or empty file is an empty store. The file is created on the
    /// first save.
    ///
    /// # Errors
    ///
    /// Returns [`OffsetStoreError::Corrupt`] if the file is not a JSON object of
    /// non-negative integers, or [`OffsetStoreError::Io`] if it cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OffsetStoreError> {
        let path = path.as_ref().to_path_buf();

        let offsets = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                OffsetStoreError::Corrupt(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Offset file does not exist yet");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), offset_count = offsets.len(), "Opened file offset store");

        Ok(Self {
            path,
            offsets: Mutex::new(offsets),
        })
    }

    /// Returns the path of the offset file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, offsets: &BTreeMap<String, u64>) -> Result<(), OffsetStoreError> {
        let bytes = serde_json::to_vec_pretty(offsets)
            .map_err(|e| OffsetStoreError::Serialization(e.to_string()))?;

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup, "Failed to remove temporary offset file");
            }
            return Err(e.into());
        }

        trace!(path = %self.path.display(), bytes = bytes.len(), "Offsets persisted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl OffsetStore for FileOffsetStore {
    async fn save_offset(&self, source: &str, offset: u64) -> Result<(), OffsetStoreError> {
        let mut offsets = self.offsets.lock().await;
        let mut updated = offsets.clone();
        updated.insert(source.to_string(), offset);

        self.persist(&updated).await?;
        *offsets = updated;

        debug!(source, offset, "Offset saved");
        Ok(())
    }

    async fn get_offset(&self, source: &str) -> Result<Option<u64>, OffsetStoreError> {
        Ok(self.offsets.lock().await.get(source).copied())
    }

    async fn delete_offset(&self, source: &str) -> Result<(), OffsetStoreError> {
        let mut offsets = self.offsets.lock().await;
        if !offsets.contains_key(source) {
            warn!(source, "Attempted to delete non-existent offset");
            return Ok(());
        }

        let mut updated = offsets.clone();
        updated.remove(source);
        self.persist(&updated).await?;
        *offsets = updated;

        debug!(source, "Offset deleted");
        Ok(())
    }

    async fn list_offsets(&self) -> Result<HashMap<String, u64>, OffsetStoreError> {
        Ok(self
            .offsets
            .lock()
            .await
            .iter()
            .map(|(source, offset)| (source.clone(), *offset))
            .collect())
    }

    async fn close(&self) -> Result<(), OffsetStoreError> {
        // Every save is already durable.
        debug!(path = %self.path.display(), "Closing file offset store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileOffsetStore::open(dir.path().join("offsets.json")).await.unwrap();

        assert!(store.list_offsets().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_save_creates_file_without_leftover_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        let store = FileOffsetStore::open(&path).await.unwrap();

        store.save_offset("events.jsonl", 42).await.unwrap();

        let contents: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(contents, serde_json::json!({"events.jsonl": 42}));
        assert!(!dir.path().join("offsets.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileOffsetStore::open(&path).await.unwrap_err();
        assert!(matches!(err, OffsetStoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_negative_offset_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, br#"{"a": -1}"#).unwrap();

        assert!(matches!(
            FileOffsetStore::open(&path).await,
            Err(OffsetStoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, b"\n").unwrap();

        let store = FileOffsetStore::open(&path).await.unwrap();
        assert_eq!(store.get_offset("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("offsets.json");
        let store = FileOffsetStore::open(&path).await.unwrap();

        let err = store.save_offset("a", 1).await.unwrap_err();
        assert!(matches!(err, OffsetStoreError::Io(_)));
        assert_eq!(store.get_offset("a").await.unwrap(), None);
    }
}
