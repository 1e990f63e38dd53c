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

//! Canonical Change Record Representation
//!
//! This module defines the [`ChangeRecord`], the single shape every change event is
//! normalized into before it reaches a target store. Records are produced by the
//! [`EventParser`](crate::parser::EventParser) and consumed exactly once by the
//! [`TargetWriter`](crate::writer::TargetWriter).
//!
//! # Examples
//!
//! ```rust
//! use chronosink_core::record::{ChangeRecord, Operation, RecordId};
//! use serde_json::{json, Map};
//!
//! let mut data = Map::new();
//! data.insert("email".to_string(), json!("a@x.com"));
//!
//! let record = ChangeRecord::new("accounts.users", 7, Operation::Create, data, 1_700_000_000_000);
//!
//! assert!(record.operation.is_upsert());
//! assert_eq!(record.id, RecordId::Int(7));
//! assert_eq!(record.relation_name(), "users");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix that marks envelope metadata fields (`__op`, `__table`, `__source_ts_ms`, ...).
pub const METADATA_PREFIX: &str = "__";

/// Default name of the source field that carries the primary key.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Returns true if a field name is reserved envelope metadata.
#[inline]
#[must_use]
pub fn is_metadata_field(name: &str) -> bool {
    name.starts_with(METADATA_PREFIX)
}

/// The kind of change a record represents.
///
/// This is a closed set: writers match on it exhaustively, so adding a variant is a
/// compile error at every call site rather than a silently ignored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A row was inserted, or read during an initial snapshot (`c`, `r`)
    Create,

    /// A row was modified (`u`)
    Update,

    /// A row was removed (`d`)
    Delete,
}

impl Operation {
    /// Maps a Debezium operation code to an operation.
    ///
    /// Snapshot reads (`r`) are treated as creates. Returns `None` for codes this
    /// pipeline does not apply, such as `t` (truncate) or `m` (message).
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" | "r" => Some(Self::Create),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns the lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns true for operations applied as an upsert (create, update).
    #[inline]
    #[must_use]
    pub const fn is_upsert(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Returns true for delete operations.
    #[inline]
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a changed row.
///
/// Source databases hand out either integer or string keys. The distinction matters
/// at the target: string keys are quoted, integer keys are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer key
    Int(i64),

    /// String key
    Str(String),
}

impl RecordId {
    /// Extracts a key from a JSON value.
    ///
    /// Returns `None` for `null`, empty strings, non-integral numbers, integers
    /// outside the `i64` range, and any other JSON type.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }

    /// Converts the key back into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    /// Returns true if the key is a string.
    #[inline]
    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    /// Returns true for an empty string key, which no valid record carries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// One normalized change, ready to be written to a bitemporal store.
///
/// A record is built fresh for every raw event and never mutated afterwards. The
/// `data` map holds the row image with envelope metadata and the key field already
/// removed; its field order follows the source event.
///
/// # Examples
///
/// ```rust
/// use chronosink_core::record::{ChangeRecord, Operation};
/// use serde_json::Map;
///
/// let record = ChangeRecord::new("inventory.orders", "ord-1", Operation::Delete, Map::new(), 1_700_000_000_000);
///
/// assert!(record.operation.is_delete());
/// assert_eq!(
///     record.valid_from().map(|t| t.to_rfc3339()),
///     Some("2023-11-14T22:13:20+00:00".to_string())
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Logical source relation, possibly schema-qualified (e.g. "accounts.users")
    pub table: String,

    /// Primary key, projected out of the configured id field
    pub id: RecordId,

    /// Kind of change
    pub operation: Operation,

    /// Row image (post-image for upserts, pre-image for deletes)
    pub data: Map<String, Value>,

    /// Source event time in epoch milliseconds; the valid-time start of the write
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
}

impl ChangeRecord {
    /// Creates a new change record.
    pub fn new(
        table: impl Into<String>,
        id: impl Into<RecordId>,
        operation: Operation,
        data: Map<String, Value>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            operation,
            data,
            timestamp_ms,
        }
    }

    /// Returns the event time as a UTC timestamp.
    ///
    /// Returns `None` if `timestamp_ms` is outside the range chrono can represent.
    #[must_use]
    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Returns the unqualified relation name: the part after the last `.`.
    ///
    /// The result is not sanitized; see
    /// [`relation_name`](crate::statement::relation_name) for the identifier that
    /// is actually written into statements.
    #[must_use]
    pub fn relation_name(&self) -> &str {
        self.table
            .rsplit_once('.')
            .map_or(self.table.as_str(), |(_, name)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::from_code("c"), Some(Operation::Create));
        assert_eq!(Operation::from_code("r"), Some(Operation::Create));
        assert_eq!(Operation::from_code("u"), Some(Operation::Update));
        assert_eq!(Operation::from_code("d"), Some(Operation::Delete));
        assert_eq!(Operation::from_code("t"), None);
        assert_eq!(Operation::from_code(""), None);
    }

    #[test]
    fn test_operation_predicates() {
        assert!(Operation::Create.is_upsert());
        assert!(Operation::Update.is_upsert());
        assert!(!Operation::Delete.is_upsert());
        assert!(Operation::Delete.is_delete());
        assert_eq!(Operation::Update.to_string(), "update");
    }

    #[test]
    fn test_record_id_from_json() {
        assert_eq!(RecordId::from_json(&json!(7)), Some(RecordId::Int(7)));
        assert_eq!(
            RecordId::from_json(&json!("abc")),
            Some(RecordId::Str("abc".to_string()))
        );
        assert_eq!(RecordId::from_json(&json!("")), None);
        assert_eq!(RecordId::from_json(&json!(null)), None);
        assert_eq!(RecordId::from_json(&json!(1.5)), None);
        assert_eq!(RecordId::from_json(&json!(u64::MAX)), None);
        assert_eq!(RecordId::from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn test_record_id_round_trips_through_json() {
        assert_eq!(RecordId::Int(42).to_json(), json!(42));
        assert_eq!(RecordId::from("k-1").to_json(), json!("k-1"));
        assert_eq!(RecordId::Int(42).to_string(), "42");
    }

    #[test]
    fn test_relation_name_strips_qualifier() {
        let record = ChangeRecord::new("accounts.users", 1, Operation::Create, Map::new(), 0);
        assert_eq!(record.relation_name(), "users");

        let record = ChangeRecord::new("users", 1, Operation::Create, Map::new(), 0);
        assert_eq!(record.relation_name(), "users");
    }

    #[test]
    fn test_valid_from() {
        let record = ChangeRecord::new("t", 1, Operation::Create, Map::new(), 1_700_000_000_000);
        let valid_from = record.valid_from().unwrap();
        assert_eq!(valid_from.timestamp_millis(), 1_700_000_000_000);

        let record = ChangeRecord::new("t", 1, Operation::Create, Map::new(), i64::MAX);
        assert!(record.valid_from().is_none());
    }

    #[test]
    fn test_metadata_fields() {
        assert!(is_metadata_field("__op"));
        assert!(is_metadata_field("__source_ts_ms"));
        assert!(!is_metadata_field("_id"));
        assert!(!is_metadata_field("email"));
    }
}
