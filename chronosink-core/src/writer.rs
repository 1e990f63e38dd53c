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

//! Target writer: applies change records to a bitemporal store.
//!
//! [`TargetWriter`] wraps one [`TargetSession`]. Each [`write`](TargetWriter::write)
//! turns a record into a [`Statement`] and executes it inside the session's open
//! transaction; [`commit`](TargetWriter::commit) and
//! [`rollback`](TargetWriter::rollback) end the transaction.
//!
//! Creates and updates become upserts valid from the record's timestamp onward.
//! Deletes close the row's validity from that timestamp onward, leaving earlier
//! versions queryable.
//!
//! Writes are never retried here. A failed write surfaces as [`WriteError`] with
//! the table, id and statement text attached.

use crate::metrics;
use crate::record::{ChangeRecord, Operation, RecordId};
use crate::session::{SessionError, TargetSession};
use crate::statement::{Statement, StatementError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Per-operation write counts.
///
/// Counts are taken when a write is staged, so they include writes from batches
/// that were later rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Create records written
    pub inserts: u64,
    /// Update records written
    pub updates: u64,
    /// Delete records written
    pub deletes: u64,
}

impl WriteStats {
    /// Returns the total number of records written.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }

    fn record(&mut self, operation: Operation) {
        match operation {
            Operation::Create => self.inserts += 1,
            Operation::Update => self.updates += 1,
            Operation::Delete => self.deletes += 1,
        }
    }
}

/// A record could not be written.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The record cannot be expressed as a statement; nothing was sent.
    #[error("cannot write record {id} to '{table}': {source}")]
    InvalidRecord {
        /// Source table
        table: String,
        /// Record id
        id: RecordId,
        /// What is wrong with the record
        #[source]
        source: StatementError,
    },

    /// The store rejected the statement or the connection failed.
    #[error("failed to {operation} record {id} in '{table}': {source}")]
    Rejected {
        /// Source table
        table: String,
        /// Record id
        id: RecordId,
        /// Operation being applied
        operation: Operation,
        /// Statement text, for diagnostics
        statement: String,
        /// The session error
        #[source]
        source: SessionError,
    },
}

impl WriteError {
    /// Returns the table of the failed record.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::InvalidRecord { table, .. } | Self::Rejected { table, .. } => table,
        }
    }

    /// Returns the id of the failed record.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        match self {
            Self::InvalidRecord { id, .. } | Self::Rejected { id, .. } => id,
        }
    }

    /// Returns true if redelivering the batch could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRecord { .. } => false,
            Self::Rejected { source, .. } => source.is_retryable(),
        }
    }
}

/// The transaction could not be committed; none of its writes are visible.
#[derive(Debug, Error)]
#[error("commit failed: {source}")]
pub struct CommitError {
    /// The session error
    #[source]
    pub source: SessionError,
}

/// The transaction could not be rolled back.
#[derive(Debug, Error)]
#[error("rollback failed: {source}")]
pub struct RollbackError {
    /// The session error
    #[source]
    pub source: SessionError,
}

/// Applies change records through one session.
#[derive(Debug)]
pub struct TargetWriter<S> {
    session: S,
    id_field: String,
    stats: WriteStats,
}

impl<S: TargetSession> TargetWriter<S> {
    /// Creates a writer over an open session.
    ///
    /// `id_field` is the source key field, excluded from written values.
    pub fn new(session: S, id_field: impl Into<String>) -> Self {
        Self {
            session,
            id_field: id_field.into(),
            stats: WriteStats::default(),
        }
    }

    /// Stages one record in the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if the record is unwritable or the store rejects it.
    #[instrument(
        skip(self, record),
        fields(table = %record.table, id = %record.id, operation = %record.operation)
    )]
    pub async fn write(&mut self, record: &ChangeRecord) -> Result<(), WriteError> {
        let statement = Statement::for_record(record, &self.id_field).map_err(|source| {
            WriteError::InvalidRecord {
                table: record.table.clone(),
                id: record.id.clone(),
                source,
            }
        })?;

        match self.session.execute(&statement).await {
            Ok(rows) => {
                debug!(relation = %statement.table(), rows, "Record staged");
                self.stats.record(record.operation);
                metrics::increment_records_written(statement.table(), record.operation.as_str());
                Ok(())
            }
            Err(source) => {
                error!(error = %source, statement = %statement, "Target store rejected write");
                Err(WriteError::Rejected {
                    table: record.table.clone(),
                    id: record.id.clone(),
                    operation: record.operation,
                    statement: statement.to_string(),
                    source,
                })
            }
        }
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError`] if the store does not confirm the commit.
    pub async fn commit(&mut self) -> Result<(), CommitError> {
        let start = Instant::now();
        let result = self.session.commit().await;
        metrics::record_commit_duration(start.elapsed());

        result.map_err(|source| {
            error!(error = %source, "Commit failed");
            CommitError { source }
        })
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RollbackError`] if the rollback cannot be delivered.
    pub async fn rollback(&mut self) -> Result<(), RollbackError> {
        self.session.rollback().await.map_err(|source| {
            warn!(error = %source, "Rollback failed");
            RollbackError { source }
        })
    }

    /// Closes the underlying session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session fails to shut down.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.session.close().await
    }

    /// Returns the write counts so far.
    #[must_use]
    pub const fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Returns the underlying session.
    pub const fn session(&self) -> &S {
        &self.session
    }
}
