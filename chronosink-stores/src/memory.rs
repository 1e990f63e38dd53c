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

//! In-memory offset store.
//!
//! Keeps offsets in a [`HashMap`] behind an [`RwLock`]. Offsets are lost when the
//! process exits, so this store only suits tests and one-shot replays where
//! resuming is not needed. Use [`FileOffsetStore`](crate::file::FileOffsetStore)
//! when a rerun must pick up where the last one stopped.
//!
//! # Example
//!
//! ```rust
//! use chronosink_stores::memory::MemoryOffsetStore;
//! use chronosink_core::offset::OffsetStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryOffsetStore::new();
//!
//! store.save_offset("events.jsonl", 500).await?;
//! assert_eq!(store.get_offset("events.jsonl").await?, Some(500));
//!
//! store.delete_offset("events.jsonl").await?;
//! assert!(store.is_empty().await);
//! # Ok(())
//! # }
//! ```

use chronosink_core::offset::{OffsetStore, OffsetStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// In-memory offset store.
///
/// Clones share the same offsets.
#[derive(Debug, Clone, Default)]
pub struct MemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryOffsetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-populated offsets.
    #[must_use]
    pub fn with_offsets(offsets: HashMap<String, u64>) -> Self {
        debug!(offset_count = offsets.len(), "Creating in-memory offset store with initial offsets");
        Self {
            offsets: Arc::new(RwLock::new(offsets)),
        }
    }

    /// Returns the number of stored offsets.
    pub async fn len(&self) -> usize {
        self.offsets.read().await.len()
    }

    /// Returns `true` if the store holds no offsets.
    pub async fn is_empty(&self) -> bool {
        self.offsets.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn save_offset(&self, source: &str, offset: u64) -> Result<(), OffsetStoreError> {
        trace!(source, offset, "Saving offset to memory");
        self.offsets.write().await.insert(source.to_string(), offset);
        Ok(())
    }

    async fn get_offset(&self, source: &str) -> Result<Option<u64>, OffsetStoreError> {
        Ok(self.offsets.read().await.get(source).copied())
    }

    async fn delete_offset(&self, source: &str) -> Result<(), OffsetStoreError> {
        if self.offsets.write().await.remove(source).is_none() {
            warn!(source, "Attempted to delete non-existent offset");
        }
        Ok(())
    }

    async fn list_offsets(&self) -> Result<HashMap<String, u64>, OffsetStoreError> {
        Ok(self.offsets.read().await.clone())
    }

    async fn close(&self) -> Result<(), OffsetStoreError> {
        debug!("Closing in-memory offset store (no-op)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryOffsetStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.get_offset("any").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryOffsetStore::new();
        store.save_offset("a", 10).await.unwrap();
        store.save_offset("a", 20).await.unwrap();

        assert_eq!(store.get_offset("a").await.unwrap(), Some(20));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_offsets() {
        let store = MemoryOffsetStore::new();
        let other = store.clone();
        store.save_offset("a", 1).await.unwrap();

        assert_eq!(other.get_offset("a").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_with_offsets_and_list() {
        let store = MemoryOffsetStore::with_offsets(HashMap::from([
            ("a".to_string(), 1),
            ("b".to_string(), 2),
        ]));

        let all = store.list_offsets().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], 2);

        store.delete_offset("a").await.unwrap();
        store.delete_offset("missing").await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
