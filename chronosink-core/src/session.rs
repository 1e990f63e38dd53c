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

//! Target-store session abstraction.
//!
//! A [`TargetSession`] is one connection to a bitemporal store with an implicit
//! transaction: every executed [`Statement`] joins the open transaction, which ends
//! with [`commit`](TargetSession::commit) or [`rollback`](TargetSession::rollback).
//! The next statement after either opens a new one. There is no nesting.
//!
//! A [`SessionFactory`] opens sessions. The batch consumer calls it once, lazily, and
//! owns the resulting session for the rest of its life.
//!
//! # Implementing a Session
//!
//! ```rust
//! use async_trait::async_trait;
//! use chronosink_core::session::{SessionError, TargetSession};
//! use chronosink_core::statement::Statement;
//!
//! struct LoggingSession {
//!     pending: Vec<String>,
//! }
//!
//! #[async_trait]
//! impl TargetSession for LoggingSession {
//!     async fn execute(&mut self, statement: &Statement) -> Result<u64, SessionError> {
//!         self.pending.push(statement.to_string());
//!         Ok(1)
//!     }
//!
//!     async fn commit(&mut self) -> Result<(), SessionError> {
//!         for sql in self.pending.drain(..) {
//!             println!("{sql}");
//!         }
//!         Ok(())
//!     }
//!
//!     async fn rollback(&mut self) -> Result<(), SessionError> {
//!         self.pending.clear();
//!         Ok(())
//!     }
//! }
//! ```

use crate::statement::Statement;
use async_trait::async_trait;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by a target-store session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session could not be opened, or the connection was lost.
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying transport error
        #[source]
        source: Option<BoxError>,
    },

    /// The store rejected a statement.
    #[error("statement rejected: {message}")]
    Rejected {
        /// Human-readable error message (usually the store's own text)
        message: String,
        /// Whether re-running the same statement could succeed
        retryable: bool,
        /// The underlying store error
        #[source]
        source: Option<BoxError>,
    },

    /// A transaction boundary (`COMMIT`, `ROLLBACK`) failed.
    #[error("transaction error: {message}")]
    Transaction {
        /// Human-readable error message
        message: String,
        /// The underlying store error
        #[source]
        source: Option<BoxError>,
    },

    /// The session was already closed.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Creates a connection error.
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error without an underlying cause.
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a statement rejection.
    pub fn rejected<E>(message: impl Into<String>, retryable: bool, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Rejected {
            message: message.into(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a statement rejection without an underlying cause.
    pub fn rejected_msg(message: impl Into<String>, retryable: bool) -> Self {
        Self::Rejected {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Creates a transaction error.
    pub fn transaction<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a transaction error without an underlying cause.
    pub fn transaction_msg(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if redelivering the batch could succeed.
    ///
    /// Nothing in this crate retries; the flag is for the upstream source.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Transaction { .. } => true,
            Self::Rejected { retryable, .. } => *retryable,
            Self::Closed => false,
        }
    }
}

/// One connection to a bitemporal store with an implicit transaction.
///
/// Sessions are owned by exactly one consumer and never shared, so methods take
/// `&mut self`. Implementations must be `Send` so the owning consumer can move
/// between runtime threads.
#[async_trait]
pub trait TargetSession: Send {
    /// Executes a statement inside the open transaction.
    ///
    /// Returns the number of rows the store reports as affected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the store rejects the statement or the
    /// connection fails.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, SessionError>;

    /// Commits the open transaction, making all its statements visible at once.
    ///
    /// Committing with no statements executed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the commit fails; the transaction's effects
    /// must then be treated as absent.
    async fn commit(&mut self) -> Result<(), SessionError>;

    /// Discards the open transaction.
    ///
    /// Rolling back with no statements executed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the rollback cannot be delivered.
    async fn rollback(&mut self) -> Result<(), SessionError>;

    /// Closes the session, discarding any uncommitted statements.
    ///
    /// The default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if shutdown fails.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Opens sessions against a target store.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// The session type this factory opens.
    type Session: TargetSession + 'static;

    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the store cannot be reached.
    async fn connect(&self) -> Result<Self::Session, SessionError>;
}
