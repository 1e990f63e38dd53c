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

//! Batch consumer: applies upstream batches as single transactions.
//!
//! The [`BatchConsumer`] sits between an upstream change source and a target store.
//! For each batch it:
//!
//! 1. Connects on first use (exactly once, even under concurrent first batches)
//! 2. Parses, writes and acknowledges each event in arrival order
//! 3. Commits, then tells the upstream the batch is finished
//!
//! Any failure in steps 1-3 rolls the transaction back and is returned to the
//! caller. The batch is never marked finished, so the upstream redelivers it from
//! its last finished position. Combined with upsert idempotency this gives
//! at-least-once delivery with effectively-once application.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──(first batch)──> Connected ──(close)──> dropped
//! ```
//!
//! The state sits behind one async mutex that is held for the whole batch, so
//! batches are applied one at a time and never interleave on the session.
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::config::ConsumerConfig;
//! use chronosink_core::consumer::{BatchConsumer, RawEvent, RecordCommitter, CommitterError};
//! use chronosink_core::memory::MemoryStore;
//!
//! #[derive(Default)]
//! struct CountingCommitter {
//!     processed: usize,
//!     finished: usize,
//! }
//!
//! #[async_trait::async_trait]
//! impl RecordCommitter for CountingCommitter {
//!     async fn mark_processed(&mut self, _event: &RawEvent) -> Result<(), CommitterError> {
//!         self.processed += 1;
//!         Ok(())
//!     }
//!
//!     async fn mark_batch_finished(&mut self) -> Result<(), CommitterError> {
//!         self.finished += 1;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let consumer = BatchConsumer::new(store.clone(), ConsumerConfig::default());
//!
//! let events = vec![RawEvent::new(
//!     r#"{"id": 7, "email": "a@x.com", "__op": "c", "__table": "accounts.users", "__source_ts_ms": 1700000000000}"#,
//! )];
//!
//! let mut committer = CountingCommitter::default();
//! let outcome = consumer.handle_batch(&events, &mut committer).await?;
//!
//! assert_eq!(outcome.written, 1);
//! assert_eq!(committer.finished, 1);
//! assert_eq!(store.row_count("users").await, 1);
//! # Ok(())
//! # }
//! ```

use crate::config::ConsumerConfig;
use crate::metrics;
use crate::parser::{EventParser, ParseError};
use crate::session::{SessionError, SessionFactory};
use crate::writer::{CommitError, RollbackError, TargetWriter, WriteError, WriteStats};
use async_trait::async_trait;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// One raw change event as delivered by the upstream source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Serialized record key, if the source provides one
    pub key: Option<String>,
    /// Serialized event payload; `None` is a tombstone
    pub value: Option<String>,
    /// Source-side destination (topic) name, if any
    pub destination: Option<String>,
}

impl RawEvent {
    /// Creates an event carrying only a payload.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: Some(value.into()),
            destination: None,
        }
    }

    /// Creates a tombstone event.
    #[must_use]
    pub fn tombstone() -> Self {
        Self::default()
    }

    /// Sets the record key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the destination name.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Upstream acknowledgment channel.
///
/// `mark_processed` is called once per event after it is staged (not yet committed).
/// `mark_batch_finished` is called once per batch, only after a successful commit;
/// it is the signal that the upstream may advance its resume position.
#[async_trait]
pub trait RecordCommitter: Send {
    /// Acknowledges that one event has been staged.
    ///
    /// # Errors
    ///
    /// Returns [`CommitterError`] if the acknowledgment fails; the batch is then
    /// rolled back.
    async fn mark_processed(&mut self, event: &RawEvent) -> Result<(), CommitterError>;

    /// Acknowledges that the whole batch is committed.
    ///
    /// # Errors
    ///
    /// Returns [`CommitterError`] if the acknowledgment fails. The batch is already
    /// committed at that point and will be reapplied on redelivery.
    async fn mark_batch_finished(&mut self) -> Result<(), CommitterError>;
}

/// An upstream acknowledgment failed.
#[derive(Debug, Error)]
#[error("committer error: {message}")]
pub struct CommitterError {
    /// Human-readable error message
    pub message: String,
    /// The underlying error
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CommitterError {
    /// Creates a committer error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a committer error with an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A batch failed. The batch was not marked finished.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The target store could not be reached.
    #[error("failed to connect to target store: {0}")]
    Connect(#[source] SessionError),

    /// An event could not be parsed.
    #[error("event {index} could not be parsed: {source}")]
    Parse {
        /// Position of the event in the batch
        index: usize,
        /// Parse failure
        #[source]
        source: ParseError,
    },

    /// A record could not be written.
    #[error("event {index} could not be written: {source}")]
    Write {
        /// Position of the event in the batch
        index: usize,
        /// Write failure, with the record's table and id
        #[source]
        source: WriteError,
    },

    /// The upstream rejected an acknowledgment.
    #[error("upstream acknowledgment failed: {source}")]
    Committer {
        /// Position of the event, or `None` for the batch-finished signal
        index: Option<usize>,
        /// Committer failure
        #[source]
        source: CommitterError,
    },

    /// The transaction could not be committed.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// The batch failed and the rollback that followed failed too.
    #[error("{cause}; additionally {rollback}")]
    RollbackFailed {
        /// The original failure
        #[source]
        cause: Box<BatchError>,
        /// The rollback failure
        rollback: RollbackError,
    },
}

impl BatchError {
    /// Returns a short, low-cardinality name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Parse { .. } => "parse",
            Self::Write { .. } => "write",
            Self::Committer { .. } => "committer",
            Self::Commit(_) => "commit",
            Self::RollbackFailed { cause, .. } => cause.kind(),
        }
    }

    /// Returns the position of the failing event, when one event is to blame.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Parse { index, .. } | Self::Write { index, .. } => Some(*index),
            Self::Committer { index, .. } => *index,
            Self::Connect(_) | Self::Commit(_) => None,
            Self::RollbackFailed { cause, .. } => cause.index(),
        }
    }

    /// Returns true if redelivering the batch could succeed.
    ///
    /// Parse failures and unwritable records fail the same way on every delivery.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(source) => source.is_retryable(),
            Self::Parse { .. } => false,
            Self::Write { source, .. } => source.is_retryable(),
            Self::Committer { .. } | Self::Commit(_) => true,
            Self::RollbackFailed { cause, .. } => cause.is_retryable(),
        }
    }
}

/// What a successful batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Raw events in the batch
    pub events: usize,
    /// Records written
    pub written: usize,
    /// Control events acknowledged without a write
    pub skipped: usize,
}

/// Connection state of a consumer.
#[derive(Debug)]
enum ConsumerState<S> {
    Disconnected,
    Connected(TargetWriter<S>),
}

/// Applies upstream batches to a target store.
///
/// One consumer owns at most one session for its whole life. Scale out by running
/// independent consumers over disjoint partitions of the source.
pub struct BatchConsumer<F: SessionFactory> {
    factory: F,
    parser: EventParser,
    config: ConsumerConfig,
    state: Mutex<ConsumerState<F::Session>>,
}

impl<F: SessionFactory> BatchConsumer<F> {
    /// Creates a disconnected consumer.
    pub fn new(factory: F, config: ConsumerConfig) -> Self {
        Self {
            factory,
            parser: EventParser::from_config(&config),
            config,
            state: Mutex::new(ConsumerState::Disconnected),
        }
    }

    /// Returns the consumer configuration.
    pub const fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Returns true once a session has been opened.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConsumerState::Connected(_))
    }

    /// Returns the write counts so far (zero while disconnected).
    pub async fn stats(&self) -> WriteStats {
        match &*self.state.lock().await {
            ConsumerState::Connected(writer) => writer.stats(),
            ConsumerState::Disconnected => WriteStats::default(),
        }
    }

    /// Applies one batch as a single transaction.
    ///
    /// Events are parsed and written in order; each is acknowledged with
    /// [`RecordCommitter::mark_processed`] once staged. After all are staged the
    /// transaction is committed and [`RecordCommitter::mark_batch_finished`] is
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for any connect, parse, write, acknowledgment or
    /// commit failure. The transaction has been rolled back (unless the failure was
    /// the batch-finished signal after a successful commit) and the batch has not
    /// been marked finished.
    #[instrument(skip(self, events, committer), fields(batch_size = events.len()))]
    pub async fn handle_batch<C>(
        &self,
        events: &[RawEvent],
        committer: &mut C,
    ) -> Result<BatchOutcome, BatchError>
    where
        C: RecordCommitter + ?Sized,
    {
        let started = Instant::now();
        metrics::record_batch_size(events.len());

        let mut state = self.state.lock().await;
        let writer = match self.ensure_connected(&mut state).await {
            Ok(writer) => writer,
            Err(err) => {
                metrics::increment_batches_failed(err.kind());
                return Err(err);
            }
        };

        let outcome = match self.apply(writer, events, committer).await {
            Ok(outcome) => outcome,
            Err(cause) => {
                let err = match writer.rollback().await {
                    Ok(()) => cause,
                    Err(rollback) => BatchError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback,
                    },
                };
                error!(error = %err, kind = err.kind(), index = ?err.index(), "Batch failed and was rolled back");
                metrics::increment_batches_failed(err.kind());
                return Err(err);
            }
        };
        metrics::increment_batches_committed();

        if let Err(source) = committer.mark_batch_finished().await {
            let err = BatchError::Committer {
                index: None,
                source,
            };
            error!(error = %err, "Batch committed but could not be marked finished");
            metrics::increment_batches_failed(err.kind());
            return Err(err);
        }

        let elapsed = started.elapsed();
        metrics::record_batch_duration(elapsed);
        info!(
            events = outcome.events,
            written = outcome.written,
            skipped = outcome.skipped,
            duration_ms = elapsed.as_millis() as u64,
            "Batch committed"
        );

        Ok(outcome)
    }

    /// Closes the session, if one was opened, and returns the final write counts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session fails to shut down.
    pub async fn close(self) -> Result<WriteStats, SessionError> {
        match self.state.into_inner() {
            ConsumerState::Connected(mut writer) => {
                let stats = writer.stats();
                writer.close().await?;
                info!(
                    inserts = stats.inserts,
                    updates = stats.updates,
                    deletes = stats.deletes,
                    "Consumer closed"
                );
                Ok(stats)
            }
            ConsumerState::Disconnected => {
                debug!("Consumer closed before connecting");
                Ok(WriteStats::default())
            }
        }
    }

    /// Opens the session if not yet connected.
    ///
    /// Must be called with the state lock held; the lock is what makes the
    /// connect single-flight.
    async fn ensure_connected<'a>(
        &self,
        state: &'a mut ConsumerState<F::Session>,
    ) -> Result<&'a mut TargetWriter<F::Session>, BatchError> {
        if matches!(state, ConsumerState::Disconnected) {
            info!("Connecting to target store");
            let session = self.factory.connect().await.map_err(|e| {
                error!(error = %e, "Target store connection failed");
                BatchError::Connect(e)
            })?;
            *state = ConsumerState::Connected(TargetWriter::new(
                session,
                self.config.id_field.clone(),
            ));
        }

        match state {
            ConsumerState::Connected(writer) => Ok(writer),
            ConsumerState::Disconnected => Err(BatchError::Connect(SessionError::connection_msg(
                "session not established",
            ))),
        }
    }

    /// Stages every event and commits. Does not roll back on failure.
    async fn apply<C>(
        &self,
        writer: &mut TargetWriter<F::Session>,
        events: &[RawEvent],
        committer: &mut C,
    ) -> Result<BatchOutcome, BatchError>
    where
        C: RecordCommitter + ?Sized,
    {
        let mut outcome = BatchOutcome {
            events: events.len(),
            ..BatchOutcome::default()
        };

        for (index, event) in events.iter().enumerate() {
            let parsed = match event.value.as_deref() {
                Some(raw) => self.parser.parse(raw),
                None => Ok(None),
            };

            match parsed.map_err(|source| BatchError::Parse { index, source })? {
                Some(record) => {
                    writer
                        .write(&record)
                        .await
                        .map_err(|source| BatchError::Write { index, source })?;
                    outcome.written += 1;
                }
                None => {
                    debug!(index, "Acknowledging control event without a write");
                    metrics::increment_records_skipped("control_event");
                    outcome.skipped += 1;
                }
            }

            committer
                .mark_processed(event)
                .await
                .map_err(|source| BatchError::Committer {
                    index: Some(index),
                    source,
                })?;
        }

        if outcome.written == 0 && outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "Batch contained only control events");
        }

        writer.commit().await?;
        Ok(outcome)
    }
}
