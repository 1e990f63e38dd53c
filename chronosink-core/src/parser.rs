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

//! Debezium event parsing.
//!
//! [`EventParser`] turns a raw Debezium event into a [`ChangeRecord`]. Two payload
//! shapes are accepted:
//!
//! - **Full envelope**, as emitted by the embedded engine without transforms:
//!   `{"before": {...}, "after": {...}, "source": {"table": ..., "ts_ms": ...}, "op": "u"}`
//! - **Flattened record**, as emitted after `ExtractNewRecordState`: the row fields
//!   plus `__op`, `__table`, `__source_ts_ms` and optionally `__deleted` side by side
//!
//! Either shape may be wrapped in the Kafka Connect `{"schema": ..., "payload": ...}`
//! structure.
//!
//! # Control events
//!
//! Tombstones (empty or `null` values), schema-change events and envelopes without
//! any row image carry no data change. They parse to `Ok(None)` so the caller can
//! acknowledge them without writing anything.
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::parser::EventParser;
//! use chronosink_core::record::{Operation, RecordId};
//!
//! let parser = EventParser::default();
//! let record = parser
//!     .parse(r#"{"id": 7, "email": "a@x.com", "__op": "c", "__table": "accounts.users", "__source_ts_ms": 1700000000000}"#)
//!     .unwrap()
//!     .unwrap();
//!
//! assert_eq!(record.table, "accounts.users");
//! assert_eq!(record.id, RecordId::Int(7));
//! assert_eq!(record.operation, Operation::Create);
//! assert_eq!(record.data.len(), 1);
//! assert_eq!(record.timestamp_ms, 1_700_000_000_000);
//! ```

use crate::config::{ConsumerConfig, TimestampPolicy};
use crate::record::{is_metadata_field, ChangeRecord, Operation, RecordId, DEFAULT_ID_FIELD};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors produced while parsing a raw event.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not valid JSON or does not have the expected structure.
    #[error("malformed change event: {reason}")]
    Malformed {
        /// What is wrong with the payload
        reason: String,
        /// The underlying JSON error, if any
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The row image has no usable value in the configured id field.
    #[error("change event for table '{table}' has no '{field}' value")]
    MissingId {
        /// Source table
        table: String,
        /// Configured id field
        field: String,
    },

    /// The event carries no source timestamp.
    #[error("change event for table '{table}' has no source timestamp")]
    MissingTimestamp {
        /// Source table
        table: String,
    },
}

impl ParseError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
            source: None,
        }
    }

    /// Returns a short, low-cardinality name for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::MissingId { .. } => "missing_id",
            Self::MissingTimestamp { .. } => "missing_timestamp",
        }
    }
}

/// Envelope fields that identify a schema-change event.
const SCHEMA_CHANGE_FIELDS: [&str; 2] = ["ddl", "tableChanges"];

/// Parses raw Debezium events into change records.
///
/// The parser is stateless apart from its configuration and never performs I/O.
#[derive(Debug, Clone)]
pub struct EventParser {
    id_field: String,
    timestamp_policy: TimestampPolicy,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(DEFAULT_ID_FIELD)
    }
}

impl EventParser {
    /// Creates a parser reading keys from `id_field`.
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            timestamp_policy: TimestampPolicy::Reject,
        }
    }

    /// Creates a parser from a consumer configuration.
    #[must_use]
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            id_field: config.id_field.clone(),
            timestamp_policy: config.timestamp_policy,
        }
    }

    /// Sets the policy for events without a source timestamp.
    #[must_use]
    pub fn with_timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = policy;
        self
    }

    /// Returns the configured id field.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Parses a JSON-encoded event.
    ///
    /// Returns `Ok(None)` for control events that carry no data change.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the payload is malformed or lacks an id or timestamp.
    pub fn parse(&self, raw: &str) -> Result<Option<ChangeRecord>, ParseError> {
        if raw.trim().is_empty() {
            trace!("Empty event payload");
            return Ok(None);
        }

        let value: Value = serde_json::from_str(raw).map_err(|e| ParseError::Malformed {
            reason: format!("invalid JSON: {e}"),
            source: Some(e),
        })?;

        self.parse_value(value)
    }

    /// Parses an already-decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the payload is malformed or lacks an id or timestamp.
    pub fn parse_value(&self, value: Value) -> Result<Option<ChangeRecord>, ParseError> {
        let object = match value {
            Value::Null => {
                trace!("Tombstone event");
                return Ok(None);
            }
            Value::Object(object) => object,
            other => {
                return Err(ParseError::malformed(format!(
                    "expected a JSON object, found {}",
                    json_type_name(&other)
                )))
            }
        };

        let Some(object) = unwrap_connect_payload(object)? else {
            trace!("Tombstone event inside Kafka Connect wrapper");
            return Ok(None);
        };

        if object.contains_key("source") {
            self.parse_envelope(object)
        } else {
            self.parse_flattened(object)
        }
    }

    /// Parses a full envelope with `before`/`after` images.
    fn parse_envelope(
        &self,
        mut envelope: Map<String, Value>,
    ) -> Result<Option<ChangeRecord>, ParseError> {
        if SCHEMA_CHANGE_FIELDS
            .iter()
            .any(|field| envelope.contains_key(*field))
        {
            debug!("Skipping schema change event");
            return Ok(None);
        }

        if !envelope.contains_key("before") && !envelope.contains_key("after") {
            debug!("Skipping envelope without row images");
            return Ok(None);
        }

        let source = match envelope.remove("source") {
            Some(Value::Object(source)) => source,
            _ => return Err(ParseError::malformed("envelope 'source' is not an object")),
        };

        let table = match source.get("table") {
            Some(Value::String(table)) if !table.is_empty() => table.clone(),
            _ => return Err(ParseError::malformed("envelope source has no table name")),
        };

        let code = string_field(&envelope, "op")?.unwrap_or("r");
        let operation = Operation::from_code(code).ok_or_else(|| {
            ParseError::malformed(format!("unsupported operation code '{code}' for table '{table}'"))
        })?;

        let timestamp_ms = self.timestamp(&source, "ts_ms", &table)?;

        let image_field = if operation.is_delete() { "before" } else { "after" };
        let image = match envelope.remove(image_field) {
            Some(Value::Object(image)) => image,
            Some(Value::Null) | None if operation.is_delete() => {
                return Err(ParseError::MissingId {
                    table,
                    field: self.id_field.clone(),
                })
            }
            Some(Value::Null) | None => {
                return Err(ParseError::malformed(format!(
                    "{operation} event for table '{table}' has no '{image_field}' image"
                )))
            }
            Some(other) => {
                return Err(ParseError::malformed(format!(
                    "'{image_field}' image for table '{table}' is {}, not an object",
                    json_type_name(&other)
                )))
            }
        };

        self.build_record(table, operation, timestamp_ms, image)
            .map(Some)
    }

    /// Parses a flattened record with `__`-prefixed metadata fields.
    fn parse_flattened(
        &self,
        record: Map<String, Value>,
    ) -> Result<Option<ChangeRecord>, ParseError> {
        let table = match string_field(&record, "__table")? {
            Some(table) if !table.is_empty() => table.to_string(),
            _ => return Err(ParseError::malformed("flattened event has no '__table' field")),
        };

        let code = string_field(&record, "__op")?.unwrap_or("c");
        let mut operation = Operation::from_code(code).ok_or_else(|| {
            ParseError::malformed(format!("unsupported operation code '{code}' for table '{table}'"))
        })?;

        if is_deleted_marker(record.get("__deleted")) {
            operation = Operation::Delete;
        }

        let timestamp_ms = self.timestamp(&record, "__source_ts_ms", &table)?;

        self.build_record(table, operation, timestamp_ms, record)
            .map(Some)
    }

    /// Projects the id out of the row image and strips metadata fields.
    fn build_record(
        &self,
        table: String,
        operation: Operation,
        timestamp_ms: i64,
        image: Map<String, Value>,
    ) -> Result<ChangeRecord, ParseError> {
        let id = match image.get(&self.id_field) {
            None | Some(Value::Null) => {
                return Err(ParseError::MissingId {
                    table,
                    field: self.id_field.clone(),
                })
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ParseError::MissingId {
                    table,
                    field: self.id_field.clone(),
                })
            }
            Some(value) => RecordId::from_json(value).ok_or_else(|| {
                ParseError::malformed(format!(
                    "'{}' for table '{table}' must be a string or an integer, found {}",
                    self.id_field,
                    json_type_name(value)
                ))
            })?,
        };

        let data: Map<String, Value> = image
            .into_iter()
            .filter(|(field, _)| !is_metadata_field(field) && *field != self.id_field)
            .collect();

        trace!(table = %table, id = %id, operation = %operation, fields = data.len(), "Parsed change event");

        Ok(ChangeRecord {
            table,
            id,
            operation,
            data,
            timestamp_ms,
        })
    }

    /// Reads the source timestamp, applying the configured policy when absent.
    fn timestamp(
        &self,
        object: &Map<String, Value>,
        field: &str,
        table: &str,
    ) -> Result<i64, ParseError> {
        let timestamp_ms = match object.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| {
                ParseError::malformed(format!("'{field}' for table '{table}' is not an integer"))
            })?),
            Some(Value::String(s)) => Some(s.trim().parse::<i64>().map_err(|_| {
                ParseError::malformed(format!(
                    "'{field}' for table '{table}' is not a millisecond timestamp: '{s}'"
                ))
            })?),
            Some(other) => {
                return Err(ParseError::malformed(format!(
                    "'{field}' for table '{table}' is {}, not a timestamp",
                    json_type_name(other)
                )))
            }
        };

        match (timestamp_ms, self.timestamp_policy) {
            (Some(ms), _) => {
                if DateTime::<Utc>::from_timestamp_millis(ms).is_none() {
                    return Err(ParseError::malformed(format!(
                        "'{field}' for table '{table}' is out of range: {ms}"
                    )));
                }
                Ok(ms)
            }
            (None, TimestampPolicy::Reject) => Err(ParseError::MissingTimestamp {
                table: table.to_string(),
            }),
            (None, TimestampPolicy::ProcessingTime) => {
                warn!(table = %table, "Event has no source timestamp, using processing time");
                Ok(Utc::now().timestamp_millis())
            }
        }
    }
}

/// Strips the Kafka Connect `{"schema": ..., "payload": ...}` wrapper, if present.
///
/// Returns `Ok(None)` when the wrapper holds a `null` payload.
fn unwrap_connect_payload(
    mut object: Map<String, Value>,
) -> Result<Option<Map<String, Value>>, ParseError> {
    let wrapped = object.contains_key("payload")
        && (object.contains_key("schema") || object.len() == 1);
    if !wrapped {
        return Ok(Some(object));
    }

    match object.remove("payload") {
        Some(Value::Object(payload)) => Ok(Some(payload)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(ParseError::malformed(format!(
            "Kafka Connect payload is {}, not an object",
            json_type_name(&other)
        ))),
    }
}

/// Reads an optional string field; any non-string, non-null value is malformed.
fn string_field<'a>(
    object: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ParseError::malformed(format!(
            "'{field}' must be a string, found {}",
            json_type_name(other)
        ))),
    }
}

/// `ExtractNewRecordState` writes `__deleted` as the string "true" or as a boolean.
fn is_deleted_marker(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(deleted)) => *deleted,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
