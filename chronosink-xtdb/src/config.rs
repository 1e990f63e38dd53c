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

//! XTDB connection configuration.
//!
//! XTDB speaks the PostgreSQL wire protocol, so the connection string is a regular
//! `postgres://` URL (or a `key=value` connection string). Credentials given through
//! the builder override any embedded in the URL.
//!
//! # Example
//!
//! ```rust
//! use chronosink_xtdb::config::XtdbConfig;
//! use chronosink_core::statement::DeleteBinding;
//!
//! let config = XtdbConfig::builder()
//!     .url("postgres://xtdb.internal:5432/xtdb")
//!     .user("ingest")
//!     .password("secret")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.delete_binding, DeleteBinding::Parameters);
//! assert!(!format!("{config:?}").contains("secret"));
//! ```

use chronosink_core::statement::DeleteBinding;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default connection URL.
pub const DEFAULT_URL: &str = "postgres://localhost:5432/xtdb";

/// Default user.
pub const DEFAULT_USER: &str = "xtdb";

/// Default password.
pub const DEFAULT_PASSWORD: &str = "xtdb";

/// Default application name reported to the server.
pub const DEFAULT_APPLICATION_NAME: &str = "chronosink";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connecting to XTDB.
#[derive(Clone, PartialEq, Eq)]
pub struct XtdbConfig {
    /// Connection URL
    pub url: String,

    /// User name
    pub user: String,

    /// Password
    pub password: String,

    /// How delete predicates are bound (default: parameters)
    pub delete_binding: DeleteBinding,

    /// Application name reported to the server
    pub application_name: String,

    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
}

impl fmt::Debug for XtdbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XtdbConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("delete_binding", &self.delete_binding)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for XtdbConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            delete_binding: DeleteBinding::Parameters,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl XtdbConfig {
    /// Creates a new builder for `XtdbConfig`.
    #[must_use]
    pub fn builder() -> XtdbConfigBuilder {
        XtdbConfigBuilder::default()
    }

    /// Builds a configuration from the process environment.
    ///
    /// | Variable        | Default     |
    /// |-----------------|-------------|
    /// | `XTDB_HOST`     | `localhost` |
    /// | `XTDB_PORT`     | `5432`      |
    /// | `XTDB_DATABASE` | `xtdb`      |
    /// | `XTDB_USER`     | `xtdb`      |
    /// | `XTDB_PASSWORD` | `xtdb`      |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, XtdbConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Same variables and defaults as [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, XtdbConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let host = var("XTDB_HOST").unwrap_or_else(|| "localhost".to_string());
        let port = match var("XTDB_PORT") {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .map_err(|_| XtdbConfigError::invalid("XTDB_PORT", format!("'{port}' is not a port number")))?,
            None => 5432,
        };
        let database = var("XTDB_DATABASE").unwrap_or_else(|| "xtdb".to_string());

        let mut builder = Self::builder().url(format!("postgres://{host}:{port}/{database}"));
        if let Some(user) = var("XTDB_USER") {
            builder = builder.user(user);
        }
        if let Some(password) = lookup("XTDB_PASSWORD") {
            builder = builder.password(password);
        }
        builder.build()
    }

    /// Parses the URL into a driver configuration with credentials applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, XtdbConfigError> {
        let mut pg = self
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| XtdbConfigError::invalid("url", e.to_string()))?;
        pg.user(&self.user)
            .password(&self.password)
            .application_name(&self.application_name)
            .connect_timeout(self.connect_timeout);
        Ok(pg)
    }
}

/// Builder for `XtdbConfig`.
#[derive(Debug, Default)]
pub struct XtdbConfigBuilder {
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    delete_binding: Option<DeleteBinding>,
    application_name: Option<String>,
    connect_timeout: Option<Duration>,
}

impl XtdbConfigBuilder {
    /// Sets the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets how delete predicates are bound.
    ///
    /// Use [`DeleteBinding::Inline`] only for servers that reject parameters inside
    /// `FOR PORTION OF VALID_TIME`.
    #[must_use]
    pub fn delete_binding(mut self, binding: DeleteBinding) -> Self {
        self.delete_binding = Some(binding);
        self
    }

    /// Sets the application name reported to the server.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Builds the `XtdbConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, the user is empty or the
    /// timeout is zero.
    pub fn build(self) -> Result<XtdbConfig, XtdbConfigError> {
        let config = XtdbConfig {
            url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            user: self.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: self.password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            delete_binding: self.delete_binding.unwrap_or_default(),
            application_name: self
                .application_name
                .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string()),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };

        if config.user.trim().is_empty() {
            return Err(XtdbConfigError::invalid("user", "must not be empty"));
        }

        if config.connect_timeout.is_zero() {
            return Err(XtdbConfigError::invalid("connect_timeout", "must be greater than zero"));
        }

        config.to_pg_config()?;
        Ok(config)
    }
}

/// XTDB configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XtdbConfigError {
    /// A parameter has an invalid value
    #[error("invalid value for '{parameter}': {message}")]
    Invalid {
        /// Parameter or variable name
        parameter: String,
        /// What is wrong with it
        message: String,
    },
}

impl XtdbConfigError {
    /// Creates an invalid-parameter error.
    #[must_use]
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}
