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

//! Metrics instrumentation for ingestion observability.
//!
//! Metrics go through the `metrics` crate facade. This crate installs no recorder;
//! without one every call here is a no-op. Applications that want export install a
//! recorder of their choice and call [`init_metrics`] once at startup.
//!
//! Nothing recorded here is ever read back by the pipeline.
//!
//! # Naming Conventions
//!
//! - Prefixed with `chronosink_`
//! - Unit suffix (`_seconds`) where applicable
//! - Counters end with `_total`
//!
//! # Labels
//!
//! - **table**: sanitized relation name (low cardinality)
//! - **operation**: "create", "update" or "delete"
//! - **reason** / **error_type**: fixed sets of short names
//!
//! Record ids and timestamps are never used as labels.
//!
//! # Examples
//!
//! ```rust
//! use chronosink_core::metrics;
//! use std::time::Duration;
//!
//! metrics::increment_records_written("users", "create");
//! metrics::record_batch_size(150);
//! metrics::record_commit_duration(Duration::from_millis(12));
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric name prefix for all chronosink metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "chronosink";

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Records applied to the target store (staged; counted before commit).
///
/// Type: Counter
/// Labels: table, operation
#[doc(hidden)]
pub const RECORDS_WRITTEN_TOTAL: &str = "chronosink_records_written_total";

/// Raw events acknowledged without producing a write.
///
/// Type: Counter
/// Labels: reason
const RECORDS_SKIPPED_TOTAL: &str = "chronosink_records_skipped_total";

/// Batches committed to the target store.
///
/// Type: Counter
#[doc(hidden)]
pub const BATCHES_COMMITTED_TOTAL: &str = "chronosink_batches_committed_total";

/// Batches that failed and were rolled back.
///
/// Type: Counter
/// Labels: error_type
const BATCHES_FAILED_TOTAL: &str = "chronosink_batches_failed_total";

/// Raw events per batch.
///
/// Type: Histogram
/// Unit: events
const BATCH_SIZE: &str = "chronosink_batch_size";

/// Time from batch receipt to batch finished.
///
/// Type: Histogram
/// Unit: seconds
const BATCH_DURATION_SECONDS: &str = "chronosink_batch_duration_seconds";

/// Time spent in the commit call.
///
/// Type: Histogram
/// Unit: seconds
const COMMIT_DURATION_SECONDS: &str = "chronosink_commit_duration_seconds";

/// Registers descriptions for all metrics.
///
/// Call once after installing a recorder. Safe to call without one.
pub fn init_metrics() {
    describe_counter!(
        RECORDS_WRITTEN_TOTAL,
        "Total number of change records applied to the target store"
    );

    describe_counter!(
        RECORDS_SKIPPED_TOTAL,
        "Total number of raw events acknowledged without a write (tombstones, schema changes)"
    );

    describe_counter!(
        BATCHES_COMMITTED_TOTAL,
        "Total number of batches committed to the target store"
    );

    describe_counter!(
        BATCHES_FAILED_TOTAL,
        "Total number of batches that failed and were rolled back"
    );

    describe_histogram!(
        BATCH_SIZE,
        metrics::Unit::Count,
        "Distribution of batch sizes (number of raw events per batch)"
    );

    describe_histogram!(
        BATCH_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken to apply and commit a batch"
    );

    describe_histogram!(
        COMMIT_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by target-store commits"
    );
}

// ============================================================================
// Counter Metrics
// ============================================================================

/// Increments the count of applied records.
pub fn increment_records_written(table: &str, operation: &str) {
    counter!(RECORDS_WRITTEN_TOTAL, "table" => table.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of events acknowledged without a write.
pub fn increment_records_skipped(reason: &str) {
    counter!(RECORDS_SKIPPED_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Increments the count of committed batches.
pub fn increment_batches_committed() {
    counter!(BATCHES_COMMITTED_TOTAL).increment(1);
}

/// Increments the count of failed batches.
///
/// `error_type` must come from a fixed set such as
/// [`BatchError::kind`](crate::consumer::BatchError::kind).
pub fn increment_batches_failed(error_type: &str) {
    counter!(BATCHES_FAILED_TOTAL, "error_type" => error_type.to_string()).increment(1);
}

// ============================================================================
// Histogram Metrics
// ============================================================================

/// Records the number of raw events in a batch.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_size(size: usize) {
    histogram!(BATCH_SIZE).record(size as f64);
}

/// Records how long a batch took end to end.
pub fn record_batch_duration(duration: Duration) {
    histogram!(BATCH_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Records how long a commit took.
pub fn record_commit_duration(duration: Duration) {
    histogram!(COMMIT_DURATION_SECONDS).record(duration.as_secs_f64());
}
