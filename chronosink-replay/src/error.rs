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

//! Replay errors.

use crate::source::SourceError;
use chronosink_core::config::ConfigError;
use chronosink_core::consumer::BatchError;
use chronosink_core::offset::OffsetStoreError;
use chronosink_core::session::SessionError;
use chronosink_xtdb::XtdbConfigError;
use thiserror::Error;

/// Anything that stops a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Consumer options are invalid.
    #[error("invalid consumer configuration: {0}")]
    Config(#[from] ConfigError),

    /// XTDB options are invalid.
    #[error("invalid XTDB configuration: {0}")]
    Xtdb(#[from] XtdbConfigError),

    /// The event file could not be loaded.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The offset store failed outside a batch.
    #[error("offset store error: {0}")]
    Offset(#[from] OffsetStoreError),

    /// A batch failed. Events before `offset` are committed.
    #[error("batch starting at event {offset} failed: {source}")]
    Batch {
        /// Position of the first event of the failed batch
        offset: u64,
        /// Batch failure
        #[source]
        source: BatchError,
    },

    /// The session could not be closed.
    #[error("failed to close XTDB session: {0}")]
    Close(#[source] SessionError),
}
