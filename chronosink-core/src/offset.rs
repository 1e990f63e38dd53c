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

//! Durable resume offsets for upstream sources.
//!
//! An upstream source records how far it has been acknowledged through
//! [`RecordCommitter::mark_batch_finished`](crate::consumer::RecordCommitter::mark_batch_finished)
//! and resumes from there after a restart. [`OffsetStore`] is where that position
//! lives. Offsets are opaque positions in the source, keyed by source name; for a
//! file replay they are event indexes.
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::offset::{OffsetStore, OffsetStoreError};
//! use std::collections::HashMap;
//!
//! #[derive(Default)]
//! struct MapOffsetStore {
//!     offsets: tokio::sync::Mutex<HashMap<String, u64>>,
//! }
//!
//! #[async_trait::async_trait]
//! impl OffsetStore for MapOffsetStore {
//!     async fn save_offset(&self, source: &str, offset: u64) -> Result<(), OffsetStoreError> {
//!         self.offsets.lock().await.insert(source.to_string(), offset);
//!         Ok(())
//!     }
//!
//!     async fn get_offset(&self, source: &str) -> Result<Option<u64>, OffsetStoreError> {
//!         Ok(self.offsets.lock().await.get(source).copied())
//!     }
//!
//!     async fn delete_offset(&self, source: &str) -> Result<(), OffsetStoreError> {
//!         self.offsets.lock().await.remove(source);
//!         Ok(())
//!     }
//!
//!     async fn list_offsets(&self) -> Result<HashMap<String, u64>, OffsetStoreError> {
//!         Ok(self.offsets.lock().await.clone())
//!     }
//!
//!     async fn close(&self) -> Result<(), OffsetStoreError> {
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashMap;

/// Storage backend for source resume offsets.
///
/// Implementations must make a saved offset durable before returning.
#[async_trait::async_trait]
pub trait OffsetStore: Send + Sync {
    /// Saves the offset for a source, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset cannot be persisted.
    async fn save_offset(&self, source: &str, offset: u64) -> Result<(), OffsetStoreError>;

    /// Retrieves the offset for a source.
    ///
    /// Returns `None` if the source has never been acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset cannot be read.
    async fn get_offset(&self, source: &str) -> Result<Option<u64>, OffsetStoreError>;

    /// Deletes the offset for a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset cannot be deleted.
    async fn delete_offset(&self, source: &str) -> Result<(), OffsetStoreError>;

    /// Lists all offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if the offsets cannot be read.
    async fn list_offsets(&self) -> Result<HashMap<String, u64>, OffsetStoreError>;

    /// Closes the store, releasing any resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed cleanly.
    async fn close(&self) -> Result<(), OffsetStoreError>;
}

/// Errors that can occur during offset storage operations.
#[derive(Debug, thiserror::Error)]
pub enum OffsetStoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The stored data is unreadable
    #[error("Corrupt offset data: {0}")]
    Corrupt(String),

    /// Other errors
    #[error("Offset store error: {0}")]
    Other(String),
}
