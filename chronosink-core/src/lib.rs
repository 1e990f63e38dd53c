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

//! Chronosink Core - CDC Ingestion into Bitemporal Stores
//!
//! This crate turns Debezium change events into bitemporal writes. Every change is
//! recorded as valid from the moment it happened in the source database, so the
//! target keeps the full history of each row instead of only its latest state.
//!
//! # Key Components
//!
//! - **Records**: [`record`] defines the normalized [`ChangeRecord`]
//! - **Parsing**: [`parser`] reads envelope and flattened Debezium events
//! - **Statements**: [`statement`] expresses upserts and temporal deletes
//! - **Sessions**: [`session`] is the seam to a concrete store
//! - **Writing**: [`writer`] applies records through a session
//! - **Batches**: [`consumer`] applies upstream batches transactionally
//! - **Offsets**: [`offset`] stores upstream resume positions
//! - **Memory store**: [`memory`] is an in-process bitemporal store for tests
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::parser::EventParser;
//! use chronosink_core::record::Operation;
//!
//! let parser = EventParser::default();
//! let record = parser
//!     .parse(r#"{"id": 1, "__op": "d", "__table": "users", "__source_ts_ms": 1700000000000}"#)
//!     .unwrap()
//!     .unwrap();
//!
//! match record.operation {
//!     Operation::Create | Operation::Update => println!("upsert {}", record.id),
//!     Operation::Delete => println!("close validity of {}", record.id),
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod memory;
pub mod metrics;
pub mod offset;
pub mod parser;
pub mod record;
pub mod session;
pub mod statement;
pub mod writer;

pub use config::{ConsumerConfig, TimestampPolicy};
pub use consumer::{BatchConsumer, BatchError, BatchOutcome, RawEvent, RecordCommitter};
pub use parser::{EventParser, ParseError};
pub use record::{ChangeRecord, Operation, RecordId};
pub use session::{SessionError, SessionFactory, TargetSession};
pub use writer::{TargetWriter, WriteError, WriteStats};
