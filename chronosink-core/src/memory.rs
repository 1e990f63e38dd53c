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

//! In-memory bitemporal store.
//!
//! [`MemoryStore`] is a [`SessionFactory`] that keeps every row's valid-time
//! history in memory. It interprets [`Statement`]s directly instead of parsing SQL,
//! with the same valid-time rules as the real store:
//!
//! - an upsert valid from `T` replaces the row's timeline from `T` onward
//! - a delete from `T` ends the row's validity from `T` onward
//! - versions before `T` are never touched
//!
//! Sessions stage statements in a transaction buffer. Commit applies the buffer in
//! one step under the store's write lock; rollback discards it.
//!
//! # Use Cases
//!
//! - **Tests** - including failure injection at every I/O point
//! - **Local development** - running the pipeline without a database
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::memory::MemoryStore;
//! use chronosink_core::record::{ChangeRecord, Operation, RecordId};
//! use chronosink_core::session::{SessionFactory, TargetSession};
//! use chronosink_core::statement::Statement;
//! use serde_json::Map;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let mut session = store.connect().await?;
//!
//! let record = ChangeRecord::new("users", 1, Operation::Create, Map::new(), 1_000);
//! session.execute(&Statement::for_record(&record, "id")?).await?;
//! session.commit().await?;
//!
//! assert!(store.current("users", &RecordId::Int(1)).await.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The store is a cheap handle over [`Arc`] and [`RwLock`]; clones share state, so
//! tests keep one clone for assertions while the consumer owns another.

use crate::record::RecordId;
use crate::session::{SessionError, SessionFactory, TargetSession};
use crate::statement::{Statement, ID_FIELD, VALID_FROM_FIELD};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// A stored row version.
pub type Row = Map<String, Value>;

/// Valid-time history of one row: each key starts a period that lasts until the
/// next key. `None` marks a period in which the row does not exist.
type Timeline = BTreeMap<DateTime<Utc>, Option<Row>>;

#[derive(Debug, Default)]
struct Faults {
    /// Fail the statement this many executions from now (1 = next)
    fail_statement_in: Option<usize>,
    fail_next_commit: bool,
    fail_rollbacks: bool,
    fail_connects: bool,
    connect_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, HashMap<RecordId, Timeline>>,
    faults: Faults,
    connections_opened: usize,
    statements_executed: usize,
    commits: usize,
    rollbacks: usize,
}

impl StoreState {
    fn apply(&mut self, write: StagedWrite) {
        match write {
            StagedWrite::Put {
                table,
                id,
                valid_from,
                row,
            } => {
                let timeline = self.timeline_mut(table, id);
                timeline.retain(|start, _| *start < valid_from);
                timeline.insert(valid_from, Some(row));
            }
            StagedWrite::End {
                table,
                id,
                valid_from,
            } => {
                let timeline = self.timeline_mut(table, id);
                timeline.retain(|start, _| *start < valid_from);
                if timeline.values().next_back().is_some_and(Option::is_some) {
                    timeline.insert(valid_from, None);
                }
            }
        }
    }

    fn timeline_mut(&mut self, table: String, id: RecordId) -> &mut Timeline {
        self.tables.entry(table).or_default().entry(id).or_default()
    }

    fn timeline(&self, table: &str, id: &RecordId) -> Option<&Timeline> {
        self.tables.get(table).and_then(|rows| rows.get(id))
    }
}

/// In-memory bitemporal store and session factory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns the row valid now, if any.
    pub async fn current(&self, table: &str, id: &RecordId) -> Option<Row> {
        self.as_of(table, id, Utc::now()).await
    }

    /// Returns the row valid at `valid_time`, if any.
    pub async fn as_of(&self, table: &str, id: &RecordId, valid_time: DateTime<Utc>) -> Option<Row> {
        let state = self.state.read().await;
        state
            .timeline(table, id)?
            .range(..=valid_time)
            .next_back()
            .and_then(|(_, row)| row.clone())
    }

    /// Returns every period of a row's history in valid-time order.
    ///
    /// Each entry is the period start and the row valid from then, or `None` where
    /// the row was deleted.
    pub async fn history(&self, table: &str, id: &RecordId) -> Vec<(DateTime<Utc>, Option<Row>)> {
        let state = self.state.read().await;
        state
            .timeline(table, id)
            .map(|timeline| {
                timeline
                    .iter()
                    .map(|(start, row)| (*start, row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of rows valid now in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        let now = Utc::now();
        let state = self.state.read().await;
        state.tables.get(table).map_or(0, |rows| {
            rows.values()
                .filter(|timeline| {
                    timeline
                        .range(..=now)
                        .next_back()
                        .is_some_and(|(_, row)| row.is_some())
                })
                .count()
        })
    }

    /// Returns the names of all tables ever written.
    pub async fn tables(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Returns how many sessions have been opened.
    pub async fn connections_opened(&self) -> usize {
        self.state.read().await.connections_opened
    }

    /// Returns how many statements have been accepted, committed or not.
    pub async fn statements_executed(&self) -> usize {
        self.state.read().await.statements_executed
    }

    /// Returns how many commits have succeeded.
    pub async fn commits(&self) -> usize {
        self.state.read().await.commits
    }

    /// Returns how many rollbacks have been requested.
    pub async fn rollbacks(&self) -> usize {
        self.state.read().await.rollbacks
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    /// Fails the `nth` statement executed from now (1 = the next one).
    pub async fn fail_statement(&self, nth: usize) {
        self.state.write().await.faults.fail_statement_in = Some(nth.max(1));
    }

    /// Fails the next commit. Its staged writes are discarded.
    pub async fn fail_next_commit(&self) {
        self.state.write().await.faults.fail_next_commit = true;
    }

    /// Fails every rollback until [`clear_faults`](Self::clear_faults).
    pub async fn fail_rollbacks(&self) {
        self.state.write().await.faults.fail_rollbacks = true;
    }

    /// Fails every connect until [`clear_faults`](Self::clear_faults).
    pub async fn fail_connects(&self) {
        self.state.write().await.faults.fail_connects = true;
    }

    /// Delays every connect, widening the window for concurrent first batches.
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.state.write().await.faults.connect_delay = Some(delay);
    }

    /// Removes all injected faults.
    pub async fn clear_faults(&self) {
        self.state.write().await.faults = Faults::default();
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, SessionError> {
        let delay = self.state.read().await.faults.connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.faults.fail_connects {
            return Err(SessionError::connection_msg("injected connect failure"));
        }
        state.connections_opened += 1;
        debug!(connections = state.connections_opened, "Memory session opened");

        Ok(MemorySession {
            store: self.clone(),
            pending: Vec::new(),
            closed: false,
        })
    }
}

/// A resolved write waiting for commit.
#[derive(Debug, Clone)]
enum StagedWrite {
    Put {
        table: String,
        id: RecordId,
        valid_from: DateTime<Utc>,
        row: Row,
    },
    End {
        table: String,
        id: RecordId,
        valid_from: DateTime<Utc>,
    },
}

impl StagedWrite {
    fn from_statement(statement: &Statement) -> Result<Self, SessionError> {
        match statement {
            Statement::Upsert { table, record } => {
                let id = record
                    .get(ID_FIELD)
                    .and_then(RecordId::from_json)
                    .ok_or_else(|| {
                        SessionError::rejected_msg(format!("record for '{table}' has no valid {ID_FIELD}"), false)
                    })?;
                let valid_from = record
                    .get(VALID_FROM_FIELD)
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .ok_or_else(|| {
                        SessionError::rejected_msg(
                            format!("record for '{table}' has no valid {VALID_FROM_FIELD}"),
                            false,
                        )
                    })?;
                Ok(Self::Put {
                    table: table.clone(),
                    id,
                    valid_from,
                    row: record.clone(),
                })
            }
            Statement::Delete {
                table,
                id,
                valid_from,
            } => Ok(Self::End {
                table: table.clone(),
                id: id.clone(),
                valid_from: *valid_from,
            }),
        }
    }
}

/// A session on a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    pending: Vec<StagedWrite>,
    closed: bool,
}

impl MemorySession {
    /// Returns the number of statements staged in the open transaction.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl TargetSession for MemorySession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let mut state = self.store.state.write().await;
        if let Some(remaining) = state.faults.fail_statement_in {
            if remaining <= 1 {
                state.faults.fail_statement_in = None;
                return Err(SessionError::rejected_msg(
                    format!("injected failure on {} into '{}'", statement.kind(), statement.table()),
                    false,
                ));
            }
            state.faults.fail_statement_in = Some(remaining - 1);
        }

        let write = StagedWrite::from_statement(statement)?;
        state.statements_executed += 1;
        trace!(statement = %statement, "Statement staged");
        self.pending.push(write);
        Ok(1)
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let writes = std::mem::take(&mut self.pending);
        let mut state = self.store.state.write().await;
        if state.faults.fail_next_commit {
            state.faults.fail_next_commit = false;
            return Err(SessionError::transaction_msg("injected commit failure"));
        }

        let count = writes.len();
        for write in writes {
            state.apply(write);
        }
        state.commits += 1;
        debug!(writes = count, "Memory transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        self.pending.clear();
        let mut state = self.store.state.write().await;
        state.rollbacks += 1;
        if state.faults.fail_rollbacks {
            return Err(SessionError::transaction_msg("injected rollback failure"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.pending.clear();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChangeRecord, Operation};
    use serde_json::json;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn upsert(id: i64, value: i64, at: i64) -> Statement {
        let mut data = Map::new();
        data.insert("v".to_string(), json!(value));
        let record = ChangeRecord::new("t", id, Operation::Update, data, at);
        Statement::for_record(&record, "id").unwrap()
    }

    fn delete(id: i64, at: i64) -> Statement {
        let record = ChangeRecord::new("t", id, Operation::Delete, Map::new(), at);
        Statement::for_record(&record, "id").unwrap()
    }

    async fn apply(store: &MemoryStore, statements: &[Statement]) {
        let mut session = store.connect().await.unwrap();
        for statement in statements {
            session.execute(statement).await.unwrap();
        }
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut session = store.connect().await.unwrap();

        session.execute(&upsert(1, 10, 1_000)).await.unwrap();
        assert_eq!(session.pending(), 1);
        assert_eq!(store.row_count("t").await, 0);

        session.commit().await.unwrap();
        assert_eq!(session.pending(), 0);
        assert_eq!(store.row_count("t").await, 1);
        assert_eq!(store.commits().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_future_versions() {
        let store = MemoryStore::new();
        apply(&store, &[upsert(1, 1, 1_000), upsert(1, 3, 3_000), upsert(1, 2, 2_000)]).await;

        let history = store.history("t", &RecordId::Int(1)).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0, ts(1_000));
        assert_eq!(history[1].0, ts(2_000));
        assert_eq!(history[1].1.as_ref().unwrap()["v"], json!(2));
    }

    #[tokio::test]
    async fn test_delete_closes_validity() {
        let store = MemoryStore::new();
        apply(&store, &[upsert(1, 1, 1_000), delete(1, 2_000)]).await;

        let id = RecordId::Int(1);
        assert_eq!(store.as_of("t", &id, ts(1_500)).await.unwrap()["v"], json!(1));
        assert!(store.as_of("t", &id, ts(2_000)).await.is_none());
        assert!(store.as_of("t", &id, ts(999)).await.is_none());
        assert_eq!(store.row_count("t").await, 0);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_row_is_noop() {
        let store = MemoryStore::new();
        apply(&store, &[delete(9, 1_000)]).await;

        assert!(store.history("t", &RecordId::Int(9)).await.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = MemoryStore::new();
        let mut session = store.connect().await.unwrap();
        session.execute(&upsert(1, 1, 1_000)).await.unwrap();
        session.rollback().await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(store.row_count("t").await, 0);
        assert_eq!(store.rollbacks().await, 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        store.fail_statement(2).await;
        let mut session = store.connect().await.unwrap();

        assert!(session.execute(&upsert(1, 1, 1_000)).await.is_ok());
        assert!(session.execute(&upsert(2, 1, 1_000)).await.is_err());
        assert!(session.execute(&upsert(3, 1, 1_000)).await.is_ok());

        store.fail_rollbacks().await;
        assert!(session.rollback().await.is_err());

        store.fail_connects().await;
        assert!(store.connect().await.is_err());

        store.clear_faults().await;
        assert!(store.connect().await.is_ok());
        assert_eq!(store.connections_opened().await, 2);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_statements() {
        let store = MemoryStore::new();
        let mut session = store.connect().await.unwrap();
        session.close().await.unwrap();

        assert!(matches!(
            session.execute(&upsert(1, 1, 1_000)).await,
            Err(SessionError::Closed)
        ));
    }
}
