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

//! Bitemporal write statements.
//!
//! A [`Statement`] is the store-neutral form of one write. The writer builds it from a
//! [`ChangeRecord`]; a session either renders it to SQL with [`Statement::render`] or
//! interprets it directly (as the in-memory store does).
//!
//! # Rendering
//!
//! | Statement | SQL |
//! |-----------|-----|
//! | Upsert    | `INSERT INTO users RECORDS $1` (one JSON parameter) |
//! | Delete    | `DELETE FROM users FOR PORTION OF VALID_TIME FROM $1 TO NULL WHERE _id = $2` |
//!
//! Table names cannot be bound, so they are always reduced to `[A-Za-z0-9_]`. With
//! [`DeleteBinding::Inline`] the delete predicate is written as literals instead of
//! parameters, with string ids quote-escaped.
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::record::{ChangeRecord, Operation};
//! use chronosink_core::statement::{DeleteBinding, Statement};
//! use serde_json::{json, Map};
//!
//! let mut data = Map::new();
//! data.insert("email".to_string(), json!("a@x.com"));
//! let record = ChangeRecord::new("accounts.users", 7, Operation::Create, data, 1_700_000_000_000);
//!
//! let statement = Statement::for_record(&record, "id").unwrap();
//! let rendered = statement.render(DeleteBinding::Parameters);
//!
//! assert_eq!(rendered.sql, "INSERT INTO users RECORDS $1");
//! ```

use crate::record::{is_metadata_field, ChangeRecord, Operation, RecordId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Identity column of every target-store table.
pub const ID_FIELD: &str = "_id";

/// Valid-time start column of every target-store table.
pub const VALID_FROM_FIELD: &str = "_valid_from";

/// How a delete's timestamp and id reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteBinding {
    /// Bind timestamp and id as statement parameters
    #[default]
    Parameters,

    /// Inline them as literals, escaping string ids
    Inline,
}

/// Errors raised while turning a record into a statement.
///
/// These are detected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    /// The table name has no characters left after sanitizing.
    #[error("table name '{table}' contains no valid identifier characters")]
    InvalidTable {
        /// Table name as received
        table: String,
    },

    /// The record carries an empty string id.
    #[error("record for table '{table}' has an empty id")]
    EmptyId {
        /// Table name as received
        table: String,
    },

    /// The timestamp cannot be represented as a UTC instant.
    #[error("timestamp {timestamp_ms} for table '{table}' is out of range")]
    InvalidTimestamp {
        /// Table name as received
        table: String,
        /// Offending epoch milliseconds
        timestamp_ms: i64,
    },
}

/// One bitemporal write.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert-or-replace a row version valid from `_valid_from` onward.
    Upsert {
        /// Sanitized relation name
        table: String,
        /// Full output record, including `_id` and `_valid_from`
        record: Map<String, Value>,
    },

    /// Close a row's validity from `valid_from` onward.
    Delete {
        /// Sanitized relation name
        table: String,
        /// Row key
        id: RecordId,
        /// Start of the closed interval
        valid_from: DateTime<Utc>,
    },
}

impl Statement {
    /// Builds the statement that applies `record`.
    ///
    /// `id_field` is the source key field; it is excluded from the written values
    /// along with every metadata field.
    ///
    /// # Errors
    ///
    /// Returns [`StatementError`] if the table, id or timestamp cannot be written.
    pub fn for_record(record: &ChangeRecord, id_field: &str) -> Result<Self, StatementError> {
        let table = relation_name(&record.table);
        if table.is_empty() {
            return Err(StatementError::InvalidTable {
                table: record.table.clone(),
            });
        }

        if record.id.is_empty() {
            return Err(StatementError::EmptyId {
                table: record.table.clone(),
            });
        }

        let valid_from = record
            .valid_from()
            .ok_or_else(|| StatementError::InvalidTimestamp {
                table: record.table.clone(),
                timestamp_ms: record.timestamp_ms,
            })?;

        let statement = match record.operation {
            Operation::Create | Operation::Update => {
                let mut output = Map::with_capacity(record.data.len() + 2);
                output.insert(ID_FIELD.to_string(), record.id.to_json());
                output.insert(
                    VALID_FROM_FIELD.to_string(),
                    Value::String(format_valid_from(&valid_from)),
                );
                for (field, value) in &record.data {
                    if is_metadata_field(field)
                        || field == id_field
                        || field == ID_FIELD
                        || field == VALID_FROM_FIELD
                    {
                        continue;
                    }
                    output.insert(field.clone(), value.clone());
                }
                Self::Upsert {
                    table,
                    record: output,
                }
            }
            Operation::Delete => Self::Delete {
                table,
                id: record.id.clone(),
                valid_from,
            },
        };

        Ok(statement)
    }

    /// Returns the sanitized relation name.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Upsert { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    /// Returns "upsert" or "delete".
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
        }
    }

    /// Renders the statement as SQL text plus parameters.
    #[must_use]
    pub fn render(&self, binding: DeleteBinding) -> RenderedStatement {
        match self {
            Self::Upsert { table, record } => RenderedStatement {
                sql: format!("INSERT INTO {table} RECORDS $1"),
                params: vec![SqlParam::Json(Value::Object(record.clone()))],
            },
            Self::Delete {
                table,
                id,
                valid_from,
            } => match binding {
                DeleteBinding::Parameters => {
                    let id_param = match id {
                        RecordId::Int(n) => SqlParam::Int(*n),
                        RecordId::Str(s) => SqlParam::Text(s.clone()),
                    };
                    RenderedStatement {
                        sql: format!(
                            "DELETE FROM {table} FOR PORTION OF VALID_TIME FROM $1 TO NULL WHERE {ID_FIELD} = $2"
                        ),
                        params: vec![SqlParam::Timestamp(*valid_from), id_param],
                    }
                }
                DeleteBinding::Inline => {
                    let id_literal = match id {
                        RecordId::Int(n) => n.to_string(),
                        RecordId::Str(s) => format!("'{}'", escape_string_literal(s)),
                    };
                    RenderedStatement {
                        sql: format!(
                            "DELETE FROM {table} FOR PORTION OF VALID_TIME FROM TIMESTAMP '{}' TO NULL WHERE {ID_FIELD} = {id_literal}",
                            format_valid_from(valid_from)
                        ),
                        params: Vec::new(),
                    }
                }
            },
        }
    }
}

impl fmt::Display for Statement {
    /// Writes a self-contained form of the statement for diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert { table, record } => {
                write!(f, "INSERT INTO {table} RECORDS {}", Value::Object(record.clone()))
            }
            Self::Delete { .. } => f.write_str(&self.render(DeleteBinding::Inline).sql),
        }
    }
}

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    /// Statement text with `$n` placeholders
    pub sql: String,
    /// Parameter values in placeholder order
    pub params: Vec<SqlParam>,
}

/// A typed statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// A whole record passed as one structured value
    Json(Value),
    /// A UTC instant
    Timestamp(DateTime<Utc>),
    /// An integer key
    Int(i64),
    /// A string key
    Text(String),
}

/// Reduces an identifier to ASCII letters, digits and underscores.
#[must_use]
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Doubles every single quote so the value can sit inside a SQL string literal.
#[must_use]
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Formats a valid-time start as ISO-8601 UTC with millisecond precision.
///
/// ```rust
/// use chronosink_core::statement::format_valid_from;
/// use chrono::DateTime;
///
/// let t = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
/// assert_eq!(format_valid_from(&t), "2023-11-14T22:13:20.000Z");
/// ```
#[must_use]
pub fn format_valid_from(valid_from: &DateTime<Utc>) -> String {
    valid_from.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns the sanitized relation a source table is written to.
///
/// Schema or database qualifiers are dropped: `accounts.users` becomes `users`.
#[must_use]
pub fn relation_name(table: &str) -> String {
    let name = table.rsplit_once('.').map_or(table, |(_, name)| name);
    sanitize_identifier(name)
}
