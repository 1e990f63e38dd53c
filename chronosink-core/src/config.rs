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

//! Consumer configuration.
//!
//! Connection settings belong to the target-store crate; this module only covers
//! what the parser and writer need to agree on.
//!
//! # Example
//!
//! ```rust
//! use chronosink_core::config::{ConsumerConfig, TimestampPolicy};
//!
//! let config = ConsumerConfig::builder()
//!     .id_field("user_id")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.id_field, "user_id");
//! assert_eq!(config.timestamp_policy, TimestampPolicy::Reject);
//! ```

use crate::record::{is_metadata_field, DEFAULT_ID_FIELD};
use thiserror::Error;

/// What to do with an event that carries no source timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Fail the event with [`ParseError::MissingTimestamp`](crate::parser::ParseError::MissingTimestamp).
    #[default]
    Reject,

    /// Use the wall-clock time at parse time as the valid-time start.
    ///
    /// This keeps ingestion moving but records the change at the wrong point in
    /// valid time. Only enable it when the source is known to omit timestamps.
    ProcessingTime,
}

/// Configuration shared by the parser and writer of one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Source field holding the primary key (default: "id")
    pub id_field: String,

    /// Handling of events without a source timestamp
    pub timestamp_policy: TimestampPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            timestamp_policy: TimestampPolicy::Reject,
        }
    }
}

impl ConsumerConfig {
    /// Creates a new builder for `ConsumerConfig`.
    #[must_use]
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::default()
    }
}

/// Builder for `ConsumerConfig`.
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
    id_field: Option<String>,
    timestamp_policy: Option<TimestampPolicy>,
}

impl ConsumerConfigBuilder {
    /// Sets the source field that holds the primary key.
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    /// Sets the policy for events without a source timestamp.
    #[must_use]
    pub fn timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = Some(policy);
        self
    }

    /// Builds the `ConsumerConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id field is empty or uses the reserved metadata prefix.
    pub fn build(self) -> Result<ConsumerConfig, ConfigError> {
        let id_field = self
            .id_field
            .unwrap_or_else(|| DEFAULT_ID_FIELD.to_string());

        if id_field.is_empty() {
            return Err(ConfigError::invalid("id_field", "must not be empty"));
        }

        if is_metadata_field(&id_field) {
            return Err(ConfigError::invalid(
                "id_field",
                format!("'{id_field}' uses the reserved metadata prefix"),
            ));
        }

        Ok(ConsumerConfig {
            id_field,
            timestamp_policy: self.timestamp_policy.unwrap_or_default(),
        })
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A parameter has an invalid value
    #[error("invalid value for '{parameter}': {message}")]
    Invalid {
        /// Parameter name
        parameter: String,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-parameter error.
    #[must_use]
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::builder().build().unwrap();
        assert_eq!(config, ConsumerConfig::default());
        assert_eq!(config.id_field, "id");
        assert_eq!(config.timestamp_policy, TimestampPolicy::Reject);
    }

    #[test]
    fn test_custom_values() {
        let config = ConsumerConfig::builder()
            .id_field("account_id")
            .timestamp_policy(TimestampPolicy::ProcessingTime)
            .build()
            .unwrap();

        assert_eq!(config.id_field, "account_id");
        assert_eq!(config.timestamp_policy, TimestampPolicy::ProcessingTime);
    }

    #[test]
    fn test_rejects_empty_id_field() {
        let err = ConsumerConfig::builder().id_field("").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref parameter, .. } if parameter == "id_field"));
    }

    #[test]
    fn test_rejects_metadata_id_field() {
        assert!(ConsumerConfig::builder().id_field("__op").build().is_err());
    }
}
