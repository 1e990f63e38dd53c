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

//! XTDB session over the PostgreSQL wire protocol.
//!
//! [`XtdbSessionFactory`] opens one `tokio-postgres` connection per session and
//! drives it on a background task. [`XtdbSession`] renders each [`Statement`] to
//! SQL, prepares it once with explicit parameter types and executes it inside a
//! read-write transaction that is opened lazily on the first statement.
//! Statements rendered with [`DeleteBinding::Inline`] carry no parameters and
//! are executed unprepared, so they never grow the statement cache.
//!
//! Upserts pass the whole record as a single `json` parameter:
//!
//! ```sql
//! INSERT INTO users RECORDS $1
//! ```
//!
//! Deletes close the row's validity from the event time onward:
//!
//! ```sql
//! DELETE FROM users FOR PORTION OF VALID_TIME FROM $1 TO NULL WHERE _id = $2
//! ```

use crate::config::{XtdbConfig, XtdbConfigError};
use async_trait::async_trait;
use chronosink_core::session::{SessionError, SessionFactory, TargetSession};
use chronosink_core::statement::{DeleteBinding, RenderedStatement, SqlParam, Statement};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, instrument, trace, warn};

/// Opens XTDB sessions.
#[derive(Debug, Clone)]
pub struct XtdbSessionFactory {
    config: XtdbConfig,
    pg_config: tokio_postgres::Config,
}

impl XtdbSessionFactory {
    /// Creates a factory for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection URL cannot be parsed.
    pub fn new(config: XtdbConfig) -> Result<Self, XtdbConfigError> {
        let pg_config = config.to_pg_config()?;
        Ok(Self { config, pg_config })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &XtdbConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for XtdbSessionFactory {
    type Session = XtdbSession;

    #[instrument(skip(self), fields(url = %self.config.url, user = %self.config.user))]
    async fn connect(&self) -> Result<XtdbSession, SessionError> {
        let (client, connection) = self
            .pg_config
            .connect(NoTls)
            .await
            .map_err(|e| SessionError::connection("failed to connect to XTDB", e))?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "XTDB connection terminated");
            }
        });

        info!("Connected to XTDB");

        Ok(XtdbSession {
            client: Some(client),
            connection_task: Some(connection_task),
            delete_binding: self.config.delete_binding,
            prepared: HashMap::new(),
            in_transaction: false,
        })
    }
}

/// One XTDB connection with an implicit transaction.
pub struct XtdbSession {
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
    delete_binding: DeleteBinding,
    prepared: HashMap<String, tokio_postgres::Statement>,
    in_transaction: bool,
}

impl std::fmt::Debug for XtdbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XtdbSession")
            .field("open", &self.client.is_some())
            .field("delete_binding", &self.delete_binding)
            .field("prepared", &self.prepared.len())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl XtdbSession {
    /// Returns true while a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn client(&self) -> Result<&Client, SessionError> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            Some(_) => Err(SessionError::connection_msg("XTDB connection is closed")),
            None => Err(SessionError::Closed),
        }
    }

    async fn begin_if_needed(&mut self) -> Result<(), SessionError> {
        if self.in_transaction {
            return Ok(());
        }
        self.client()?
            .batch_execute("BEGIN READ WRITE")
            .await
            .map_err(|e| SessionError::transaction("failed to begin transaction", e))?;
        self.in_transaction = true;
        trace!("Transaction opened");
        Ok(())
    }

    async fn prepare(&mut self, sql: &str, types: &[Type]) -> Result<tokio_postgres::Statement, SessionError> {
        if let Some(statement) = self.prepared.get(sql) {
            return Ok(statement.clone());
        }
        let statement = self
            .client()?
            .prepare_typed(sql, types)
            .await
            .map_err(|e| classify(e, sql))?;
        debug!(sql, "Prepared statement");
        self.prepared.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }
}

#[async_trait]
impl TargetSession for XtdbSession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, SessionError> {
        let rendered = statement.render(self.delete_binding);
        self.begin_if_needed().await?;

        let rows = match cache_key(&rendered) {
            Some(sql) => {
                let types: Vec<Type> = rendered.params.iter().map(param_type).collect();
                let prepared = self.prepare(sql, &types).await?;
                let params: Vec<&(dyn ToSql + Sync)> =
                    rendered.params.iter().map(param_value).collect();
                self.client()?.execute(&prepared, &params).await
            }
            // Literal SQL differs per row; run it as an unnamed statement.
            None => self.client()?.execute(rendered.sql.as_str(), &[]).await,
        }
        .map_err(|e| classify(e, &rendered.sql))?;

        trace!(sql = %rendered.sql, rows, "Statement executed");
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client()?
            .batch_execute("COMMIT")
            .await
            .map_err(|e| SessionError::transaction("commit failed", e))
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client()?
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| SessionError::transaction("rollback failed", e))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.in_transaction {
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback on close failed");
            }
        }
        self.prepared.clear();

        // Dropping the client ends the connection future.
        drop(self.client.take());
        if let Some(task) = self.connection_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "XTDB connection task did not finish cleanly");
            }
        }
        info!("XTDB session closed");
        Ok(())
    }
}

/// Returns the SQL text to prepare and cache, or `None` for statements that
/// carry their values inline and would never be reused.
fn cache_key(rendered: &RenderedStatement) -> Option<&str> {
    (!rendered.params.is_empty()).then_some(rendered.sql.as_str())
}

fn param_type(param: &SqlParam) -> Type {
    match param {
        SqlParam::Json(_) => Type::JSON,
        SqlParam::Timestamp(_) => Type::TIMESTAMPTZ,
        SqlParam::Int(_) => Type::INT8,
        SqlParam::Text(_) => Type::TEXT,
    }
}

fn param_value(param: &SqlParam) -> &(dyn ToSql + Sync) {
    match param {
        SqlParam::Json(value) => value as &(dyn ToSql + Sync),
        SqlParam::Timestamp(ts) => ts as &(dyn ToSql + Sync),
        SqlParam::Int(n) => n as &(dyn ToSql + Sync),
        SqlParam::Text(s) => s as &(dyn ToSql + Sync),
    }
}

/// Maps a driver error to a session error.
///
/// Serialization failures, deadlocks and lost connections are retryable; anything
/// the server rejected on its merits is not.
fn classify(error: tokio_postgres::Error, sql: &str) -> SessionError {
    if error.is_closed() {
        return SessionError::connection(format!("connection lost while executing: {sql}"), error);
    }

    let retryable = error.code().is_some_and(is_transient);
    let message = match error.as_db_error() {
        Some(db) => format!("{} (executing: {sql})", db.message()),
        None => format!("{error} (executing: {sql})"),
    };
    SessionError::rejected(message, retryable, error)
}

fn is_transient(code: &SqlState) -> bool {
    let class = code.code();
    class.starts_with("08") || class.starts_with("40") || class.starts_with("57P")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use chronosink_core::record::RecordId;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_param_types() {
        assert_eq!(param_type(&SqlParam::Json(json!({}))), Type::JSON);
        assert_eq!(
            param_type(&SqlParam::Timestamp(DateTime::from_timestamp_millis(0).unwrap())),
            Type::TIMESTAMPTZ
        );
        assert_eq!(param_type(&SqlParam::Int(1)), Type::INT8);
        assert_eq!(param_type(&SqlParam::Text("a".to_string())), Type::TEXT);
    }

    fn delete(id: i64, at_ms: i64) -> Statement {
        Statement::Delete {
            table: "users".to_string(),
            id: RecordId::from(id),
            valid_from: DateTime::from_timestamp_millis(at_ms).unwrap(),
        }
    }

    #[test]
    fn test_inline_deletes_are_not_cached() {
        let mut keys = HashSet::new();
        for (id, at_ms) in [(1, 1_000), (2, 2_000), (3, 3_000)] {
            let rendered = delete(id, at_ms).render(DeleteBinding::Inline);
            assert!(rendered.params.is_empty());
            if let Some(key) = cache_key(&rendered) {
                keys.insert(key.to_string());
            }
        }
        assert!(keys.is_empty());
    }

    #[test]
    fn test_bound_deletes_share_one_cache_entry() {
        let mut keys = HashSet::new();
        for (id, at_ms) in [(1, 1_000), (2, 2_000), (3, 3_000)] {
            let rendered = delete(id, at_ms).render(DeleteBinding::Parameters);
            keys.insert(cache_key(&rendered).unwrap().to_string());
        }
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_transient_sql_states() {
        assert!(is_transient(&SqlState::T_R_SERIALIZATION_FAILURE));
        assert!(is_transient(&SqlState::T_R_DEADLOCK_DETECTED));
        assert!(is_transient(&SqlState::CONNECTION_FAILURE));
        assert!(is_transient(&SqlState::ADMIN_SHUTDOWN));
        assert!(!is_transient(&SqlState::UNIQUE_VIOLATION));
        assert!(!is_transient(&SqlState::SYNTAX_ERROR));
    }

    #[test]
    fn test_factory_rejects_bad_url() {
        let config = XtdbConfig {
            url: "postgres://host:notaport/db".to_string(),
            ..XtdbConfig::default()
        };
        assert!(XtdbSessionFactory::new(config).is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let config = XtdbConfig::builder()
            .url("postgres://127.0.0.1:1/xtdb")
            .connect_timeout(std::time::Duration::from_secs(1))
            .build()
            .unwrap();
        let factory = XtdbSessionFactory::new(config).unwrap();

        let err = factory.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Connection { .. }));
        assert!(err.is_retryable());
    }
}
