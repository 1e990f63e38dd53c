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

//! Chronosink XTDB - Bitemporal Target Store
//!
//! This crate connects the chronosink batch consumer to [XTDB](https://xtdb.com)
//! through its PostgreSQL wire protocol endpoint.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chronosink_core::{BatchConsumer, ConsumerConfig};
//! use chronosink_xtdb::{XtdbConfig, XtdbSessionFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = XtdbSessionFactory::new(XtdbConfig::from_env()?)?;
//!     let consumer = BatchConsumer::new(factory, ConsumerConfig::default());
//!
//!     // consumer.handle_batch(&events, &mut committer).await?;
//!
//!     let stats = consumer.close().await?;
//!     println!("{} records written", stats.total());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod session;

pub use config::{XtdbConfig, XtdbConfigBuilder, XtdbConfigError};
pub use session::{XtdbSession, XtdbSessionFactory};
