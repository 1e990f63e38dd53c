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

//! Acknowledgments backed by an offset store.

use async_trait::async_trait;
use chronosink_core::consumer::{CommitterError, RawEvent, RecordCommitter};
use chronosink_core::offset::OffsetStore;
use std::sync::Arc;
use tracing::debug;

/// Advances a source's stored offset as batches finish.
///
/// The offset is the index of the first event not yet committed. Events marked
/// processed only count once their batch finishes, so a failed batch leaves the
/// stored offset where it was.
pub struct OffsetCommitter {
    store: Arc<dyn OffsetStore>,
    source: String,
    position: u64,
    pending: u64,
}

impl OffsetCommitter {
    /// Creates a committer starting at `position`.
    pub fn new(store: Arc<dyn OffsetStore>, source: impl Into<String>, position: u64) -> Self {
        Self {
            store,
            source: source.into(),
            position,
            pending: 0,
        }
    }

    /// Returns the last durable position.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Forgets events processed in an unfinished batch.
    pub fn discard_pending(&mut self) {
        self.pending = 0;
    }
}

#[async_trait]
impl RecordCommitter for OffsetCommitter {
    async fn mark_processed(&mut self, _event: &RawEvent) -> Result<(), CommitterError> {
        self.pending += 1;
        Ok(())
    }

    async fn mark_batch_finished(&mut self) -> Result<(), CommitterError> {
        let next = self.position + self.pending;
        self.store
            .save_offset(&self.source, next)
            .await
            .map_err(|e| CommitterError::with_source(format!("failed to save offset for {}", self.source), e))?;

        debug!(source = %self.source, offset = next, "Offset advanced");
        self.position = next;
        self.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronosink_core::offset::OffsetStoreError;
    use chronosink_stores::MemoryOffsetStore;
    use std::collections::HashMap;

    struct FailingStore;

    #[async_trait]
    impl OffsetStore for FailingStore {
        async fn save_offset(&self, _source: &str, _offset: u64) -> Result<(), OffsetStoreError> {
            Err(OffsetStoreError::Other("disk full".to_string()))
        }
        async fn get_offset(&self, _source: &str) -> Result<Option<u64>, OffsetStoreError> {
            Ok(None)
        }
        async fn delete_offset(&self, _source: &str) -> Result<(), OffsetStoreError> {
            Ok(())
        }
        async fn list_offsets(&self) -> Result<HashMap<String, u64>, OffsetStoreError> {
            Ok(HashMap::new())
        }
        async fn close(&self) -> Result<(), OffsetStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_offset_advances_only_when_batch_finishes() {
        let store = MemoryOffsetStore::new();
        let mut committer = OffsetCommitter::new(Arc::new(store.clone()), "f", 10);

        committer.mark_processed(&RawEvent::tombstone()).await.unwrap();
        committer.mark_processed(&RawEvent::tombstone()).await.unwrap();
        assert_eq!(store.get_offset("f").await.unwrap(), None);

        committer.mark_batch_finished().await.unwrap();
        assert_eq!(store.get_offset("f").await.unwrap(), Some(12));
        assert_eq!(committer.position(), 12);
    }

    #[tokio::test]
    async fn test_discarded_events_are_not_counted() {
        let store = MemoryOffsetStore::new();
        let mut committer = OffsetCommitter::new(Arc::new(store.clone()), "f", 0);

        committer.mark_processed(&RawEvent::tombstone()).await.unwrap();
        committer.discard_pending();
        committer.mark_processed(&RawEvent::tombstone()).await.unwrap();
        committer.mark_batch_finished().await.unwrap();

        assert_eq!(store.get_offset("f").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_store_failure_keeps_position() {
        let mut committer = OffsetCommitter::new(Arc::new(FailingStore), "f", 5);
        committer.mark_processed(&RawEvent::tombstone()).await.unwrap();

        let err = committer.mark_batch_finished().await.unwrap_err();
        assert!(err.message.contains("failed to save offset"));
        assert_eq!(committer.position(), 5);
    }
}
