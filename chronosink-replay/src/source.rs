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

//! Event files.
//!
//! Two layouts are accepted. A file whose first non-blank character is `[` is a
//! JSON array, one event per element. Anything else is JSON lines, one event
//! per non-blank line. `null` elements and `null` lines are tombstones.

use chronosink_core::consumer::RawEvent;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// An event file could not be loaded.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is neither a JSON array nor JSON lines.
    #[error("line {line}: invalid JSON: {source}")]
    Json {
        /// 1-based line number of the failure
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Reads every event in `path`, tagging each with `destination`.
pub async fn load_events(path: &Path, destination: &str) -> Result<Vec<RawEvent>, SourceError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let events = parse_events(&text, destination)?;
    debug!(path = %path.display(), events = events.len(), "Loaded event file");
    Ok(events)
}

/// Splits file contents into raw events.
pub fn parse_events(text: &str, destination: &str) -> Result<Vec<RawEvent>, SourceError> {
    if text.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(text).map_err(|source| SourceError::Json {
            line: source.line(),
            source,
        })?;
        return Ok(values
            .into_iter()
            .map(|value| to_event(value, destination))
            .collect());
    }

    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|source| SourceError::Json {
            line: index + 1,
            source,
        })?;
        events.push(to_event(value, destination));
    }
    Ok(events)
}

fn to_event(value: Value, destination: &str) -> RawEvent {
    let event = match value {
        Value::Null => RawEvent::tombstone(),
        other => RawEvent::new(other.to_string()),
    };
    event.with_destination(destination)
}
