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

//! End-to-end tests of the batch consumer against the in-memory bitemporal store.
//!
//! These exercise the delivery guarantees: idempotent replays, history
//! preservation, all-or-nothing batches and per-key ordering.

use async_trait::async_trait;
use chrono::DateTime;
use chronosink_core::consumer::{BatchConsumer, BatchError, CommitterError, RawEvent, RecordCommitter};
use chronosink_core::memory::MemoryStore;
use chronosink_core::record::RecordId;
use chronosink_core::ConsumerConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Committer that tracks acknowledgments like an offset-keeping upstream.
#[derive(Debug, Default)]
struct TrackingCommitter {
    staged: usize,
    finished_batches: usize,
}

#[async_trait]
impl RecordCommitter for TrackingCommitter {
    async fn mark_processed(&mut self, _event: &RawEvent) -> Result<(), CommitterError> {
        self.staged += 1;
        Ok(())
    }

    async fn mark_batch_finished(&mut self) -> Result<(), CommitterError> {
        self.finished_batches += 1;
        Ok(())
    }
}

fn flattened(id: i64, op: &str, ts: i64, fields: Value) -> RawEvent {
    let mut event = fields;
    event["id"] = json!(id);
    event["__op"] = json!(op);
    event["__table"] = json!("accounts.users");
    event["__source_ts_ms"] = json!(ts);
    RawEvent::new(event.to_string())
}

fn at(ms: i64) -> DateTime<chrono::Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn consumer(store: &MemoryStore) -> BatchConsumer<MemoryStore> {
    BatchConsumer::new(store.clone(), ConsumerConfig::default())
}

#[tokio::test]
async fn test_example_scenario() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let mut committer = TrackingCommitter::default();

    let events = vec![RawEvent::new(
        r#"{"id": 7, "email": "a@x.com", "__op": "c", "__table": "accounts.users", "__source_ts_ms": 1700000000000}"#,
    )];
    consumer.handle_batch(&events, &mut committer).await.unwrap();

    let row = store.current("users", &RecordId::Int(7)).await.unwrap();
    assert_eq!(
        Value::Object(row),
        json!({"_id": 7, "_valid_from": "2023-11-14T22:13:20.000Z", "email": "a@x.com"})
    );
    assert_eq!(committer.staged, 1);
    assert_eq!(committer.finished_batches, 1);
}

#[tokio::test]
async fn test_idempotent_upsert() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let batch = vec![flattened(1, "u", 1_000, json!({"name": "ada"}))];

    consumer
        .handle_batch(&batch, &mut TrackingCommitter::default())
        .await
        .unwrap();
    let once = store.history("users", &RecordId::Int(1)).await;

    consumer
        .handle_batch(&batch, &mut TrackingCommitter::default())
        .await
        .unwrap();
    let twice = store.history("users", &RecordId::Int(1)).await;

    assert_eq!(once, twice);
    assert_eq!(store.row_count("users").await, 1);
}

#[tokio::test]
async fn test_idempotent_delete() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let id = RecordId::Int(1);

    consumer
        .handle_batch(
            &[flattened(1, "c", 1_000, json!({"name": "ada"}))],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    let delete = vec![flattened(1, "d", 2_000, json!({"name": "ada"}))];
    consumer
        .handle_batch(&delete, &mut TrackingCommitter::default())
        .await
        .unwrap();
    let once = store.history("users", &id).await;

    consumer
        .handle_batch(&delete, &mut TrackingCommitter::default())
        .await
        .unwrap();
    let twice = store.history("users", &id).await;

    assert_eq!(once, twice);
    assert_eq!(twice.last().map(|(start, row)| (*start, row.is_none())), Some((at(2_000), true)));
}

#[tokio::test]
async fn test_history_preserved_after_delete() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let id = RecordId::Int(3);

    consumer
        .handle_batch(
            &[
                flattened(3, "c", 1_000, json!({"status": "new"})),
                flattened(3, "u", 2_000, json!({"status": "active"})),
                flattened(3, "d", 3_000, json!({"status": "active"})),
            ],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    assert_eq!(store.as_of("users", &id, at(1_500)).await.unwrap()["status"], json!("new"));
    assert_eq!(store.as_of("users", &id, at(2_999)).await.unwrap()["status"], json!("active"));
    assert!(store.as_of("users", &id, at(3_000)).await.is_none());
    assert!(store.current("users", &id).await.is_none());
}

#[tokio::test]
async fn test_metadata_stripped() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);

    consumer
        .handle_batch(
            &[flattened(5, "c", 1_000, json!({"email": "e@x.com", "__deleted": "false", "__lsn": 42}))],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    let row = store.current("users", &RecordId::Int(5)).await.unwrap();
    for key in ["__op", "__table", "__source_ts_ms", "__deleted", "__lsn", "id"] {
        assert!(!row.contains_key(key), "row still contains {key}");
    }
    assert_eq!(row["email"], json!("e@x.com"));
}

#[tokio::test]
async fn test_batch_atomicity() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);

    consumer
        .handle_batch(
            &[flattened(1, "c", 1_000, json!({"v": "committed"}))],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    store.fail_statement(2).await;
    let mut committer = TrackingCommitter::default();
    let err = consumer
        .handle_batch(
            &[
                flattened(1, "u", 2_000, json!({"v": "first"})),
                flattened(2, "c", 2_000, json!({"v": "second"})),
                flattened(3, "c", 2_000, json!({"v": "third"})),
            ],
            &mut committer,
        )
        .await
        .unwrap_err();

    let BatchError::Write { index, source } = &err else {
        panic!("expected write failure, got {err:?}");
    };
    assert_eq!(*index, 1);
    assert_eq!(source.id(), &RecordId::Int(2));
    assert_eq!(source.table(), "accounts.users");

    assert_eq!(committer.staged, 1);
    assert_eq!(committer.finished_batches, 0);
    assert_eq!(
        store.current("users", &RecordId::Int(1)).await.unwrap()["v"],
        json!("committed")
    );
    assert!(store.current("users", &RecordId::Int(2)).await.is_none());
    assert!(store.current("users", &RecordId::Int(3)).await.is_none());
}

#[tokio::test]
async fn test_redelivery_after_failure_applies_batch() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let batch = vec![
        flattened(1, "c", 1_000, json!({})),
        flattened(2, "c", 1_000, json!({})),
    ];

    store.fail_next_commit().await;
    assert!(consumer
        .handle_batch(&batch, &mut TrackingCommitter::default())
        .await
        .is_err());
    assert_eq!(store.row_count("users").await, 0);

    let mut committer = TrackingCommitter::default();
    consumer.handle_batch(&batch, &mut committer).await.unwrap();
    assert_eq!(store.row_count("users").await, 2);
    assert_eq!(committer.finished_batches, 1);
    assert_eq!(store.connections_opened().await, 1);
}

#[tokio::test]
async fn test_ordering_within_key() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);

    consumer
        .handle_batch(
            &[
                flattened(9, "c", 1_000, json!({"v": "t1"})),
                flattened(9, "u", 2_000, json!({"v": "t2"})),
            ],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    let history = store.history("users", &RecordId::Int(9)).await;
    let states: Vec<(i64, Value)> = history
        .into_iter()
        .map(|(start, row)| (start.timestamp_millis(), row.map_or(Value::Null, |r| r["v"].clone())))
        .collect();

    assert_eq!(states, vec![(1_000, json!("t1")), (2_000, json!("t2"))]);
}

#[tokio::test]
async fn test_other_keys_unaffected_by_out_of_order_delivery() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);

    consumer
        .handle_batch(
            &[
                flattened(1, "c", 5_000, json!({"v": "a"})),
                flattened(2, "c", 1_000, json!({"v": "b"})),
            ],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    assert_eq!(store.history("users", &RecordId::Int(1)).await.len(), 1);
    assert_eq!(store.history("users", &RecordId::Int(2)).await.len(), 1);
}

#[tokio::test]
async fn test_parse_failure_is_fatal() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let mut committer = TrackingCommitter::default();

    let err = consumer
        .handle_batch(
            &[
                flattened(1, "c", 1_000, json!({})),
                RawEvent::new(r#"{"name": "no id", "__table": "users", "__source_ts_ms": 1}"#),
            ],
            &mut committer,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::Parse { index: 1, .. }));
    assert!(!err.is_retryable());
    assert_eq!(committer.finished_batches, 0);
    assert_eq!(store.row_count("users").await, 0);
}

#[tokio::test]
async fn test_control_events_are_acknowledged() {
    let store = MemoryStore::new();
    let consumer = consumer(&store);
    let mut committer = TrackingCommitter::default();

    let outcome = consumer
        .handle_batch(
            &[
                RawEvent::tombstone().with_key(r#"{"id": 1}"#),
                RawEvent::new(r#"{"source": {"table": "users"}, "ddl": "CREATE TABLE users (id INT)"}"#)
                    .with_destination("accounts"),
                flattened(1, "c", 1_000, json!({})),
            ],
            &mut committer,
        )
        .await
        .unwrap();

    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.written, 1);
    assert_eq!(committer.staged, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_batches_connect_once() {
    let store = MemoryStore::new();
    store.set_connect_delay(Duration::from_millis(50)).await;
    let consumer = Arc::new(consumer(&store));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move {
                let mut committer = TrackingCommitter::default();
                consumer
                    .handle_batch(&[flattened(i, "c", 1_000, json!({}))], &mut committer)
                    .await
                    .map(|_| committer.finished_batches)
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), 1);
    }

    assert_eq!(store.connections_opened().await, 1);
    assert_eq!(store.row_count("users").await, 8);
    assert_eq!(store.commits().await, 8);
}

#[tokio::test]
async fn test_envelope_events_end_to_end() {
    let store = MemoryStore::new();
    let consumer = BatchConsumer::new(
        store.clone(),
        ConsumerConfig::builder().id_field("sku").build().unwrap(),
    );

    let create = json!({
        "schema": {"type": "struct", "name": "inventory.products.Envelope"},
        "payload": {
            "before": null,
            "after": {"sku": "A-1", "price": 10},
            "source": {"connector": "postgresql", "schema": "inventory", "table": "products", "ts_ms": 1_000},
            "op": "c"
        }
    });
    let delete = json!({
        "before": {"sku": "A-1", "price": 12},
        "after": null,
        "source": {"table": "products", "ts_ms": 2_000},
        "op": "d"
    });

    consumer
        .handle_batch(
            &[RawEvent::new(create.to_string()), RawEvent::new(delete.to_string())],
            &mut TrackingCommitter::default(),
        )
        .await
        .unwrap();

    let id = RecordId::from("A-1");
    let row = store.as_of("products", &id, at(1_000)).await.unwrap();
    assert_eq!(row["price"], json!(10));
    assert!(!row.contains_key("sku"));
    assert!(store.current("products", &id).await.is_none());
    assert_eq!(store.tables().await, vec!["products".to_string()]);
}
