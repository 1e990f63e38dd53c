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

//! Shared fixtures for the chronosink benchmarks.

use async_trait::async_trait;
use chronosink_core::consumer::{CommitterError, RawEvent, RecordCommitter};
use serde_json::json;

/// Base source timestamp for generated events.
pub const BASE_TS_MS: i64 = 1_700_000_000_000;

/// Flattened events cycling through create, update and delete.
pub fn flattened_events(count: usize, table: &str) -> Vec<RawEvent> {
    (0..count)
        .map(|i| {
            let op = match i % 3 {
                0 => "c",
                1 => "u",
                _ => "d",
            };
            RawEvent::new(
                json!({
                    "id": (i / 3) as i64,
                    "email": format!("user{i}@example.com"),
                    "score": i,
                    "active": i % 2 == 0,
                    "__op": op,
                    "__table": table,
                    "__source_ts_ms": BASE_TS_MS + i as i64,
                })
                .to_string(),
            )
        })
        .collect()
}

/// Full Debezium envelopes wrapped in a Kafka Connect `{schema, payload}` object.
pub fn envelope_events(count: usize, table: &str) -> Vec<RawEvent> {
    (0..count)
        .map(|i| {
            let row = json!({
                "id": i as i64,
                "email": format!("user{i}@example.com"),
                "bio": "x".repeat(200),
            });
            RawEvent::new(
                json!({
                    "schema": {"type": "struct", "optional": false},
                    "payload": {
                        "before": null,
                        "after": row,
                        "op": "c",
                        "ts_ms": BASE_TS_MS + i as i64,
                        "source": {
                            "connector": "postgresql",
                            "db": "inventory",
                            "schema": "public",
                            "table": table,
                            "ts_ms": BASE_TS_MS + i as i64,
                        },
                    },
                })
                .to_string(),
            )
        })
        .collect()
}

/// Committer that acknowledges everything.
#[derive(Debug, Default)]
pub struct NoopCommitter {
    /// Events acknowledged so far
    pub processed: usize,
}

#[async_trait]
impl RecordCommitter for NoopCommitter {
    async fn mark_processed(&mut self, _event: &RawEvent) -> Result<(), CommitterError> {
        self.processed += 1;
        Ok(())
    }

    async fn mark_batch_finished(&mut self) -> Result<(), CommitterError> {
        Ok(())
    }
}
