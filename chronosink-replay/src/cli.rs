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

//! Command-line options.

use chronosink_core::config::{ConfigError, ConsumerConfig, TimestampPolicy};
use chronosink_core::statement::DeleteBinding;
use chronosink_xtdb::{XtdbConfig, XtdbConfigError};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Replay captured Debezium change events into XTDB.
///
/// The input is a JSON array of events or one event per line. Each event may
/// be a full Debezium envelope or a flattened record. With `--offset-file` the
/// position of the last committed batch is stored, and a rerun resumes there.
#[derive(Parser, Debug, Clone)]
#[command(name = "chronosink-replay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// File of change events (JSON array or JSON lines)
    #[arg(env = "CHRONOSINK_INPUT")]
    pub input: PathBuf,

    /// Number of events committed per transaction
    #[arg(long, default_value_t = 500, env = "CHRONOSINK_BATCH_SIZE", value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,

    /// Source field holding the primary key
    #[arg(long, default_value = "id", env = "CHRONOSINK_ID_FIELD")]
    pub id_field: String,

    /// Handling of events without a source timestamp
    #[arg(long, value_enum, default_value_t = TimestampMode::Reject, env = "CHRONOSINK_TIMESTAMP_POLICY")]
    pub timestamp_policy: TimestampMode,

    /// File where resume offsets are kept; without it every run starts at the beginning
    #[arg(long, env = "CHRONOSINK_OFFSET_FILE")]
    pub offset_file: Option<PathBuf>,

    /// Name the offset is stored under (default: the input file name)
    #[arg(long, env = "CHRONOSINK_SOURCE_NAME")]
    pub source_name: Option<String>,

    /// Forget the stored offset and replay the whole file
    #[arg(long)]
    pub from_start: bool,

    /// XTDB connection URL (default: built from XTDB_HOST, XTDB_PORT and XTDB_DATABASE)
    #[arg(long, env = "XTDB_URL")]
    pub xtdb_url: Option<String>,

    /// XTDB user
    #[arg(long, env = "XTDB_USER")]
    pub xtdb_user: Option<String>,

    /// XTDB password
    #[arg(long, env = "XTDB_PASSWORD", hide_env_values = true)]
    pub xtdb_password: Option<String>,

    /// How delete timestamps and ids are sent to XTDB
    #[arg(long, value_enum, default_value_t = DeleteMode::Parameters, env = "CHRONOSINK_DELETE_BINDING")]
    pub delete_binding: DeleteMode,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "CHRONOSINK_LOG_LEVEL")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "CHRONOSINK_JSON_LOGS")]
    pub json_logs: bool,
}

/// `--timestamp-policy` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimestampMode {
    /// Fail events without a source timestamp
    Reject,
    /// Stamp them with the time they are parsed
    ProcessingTime,
}

impl From<TimestampMode> for TimestampPolicy {
    fn from(mode: TimestampMode) -> Self {
        match mode {
            TimestampMode::Reject => Self::Reject,
            TimestampMode::ProcessingTime => Self::ProcessingTime,
        }
    }
}

/// `--delete-binding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeleteMode {
    /// Bind timestamp and id as parameters
    Parameters,
    /// Inline them as escaped literals
    Inline,
}

impl From<DeleteMode> for DeleteBinding {
    fn from(mode: DeleteMode) -> Self {
        match mode {
            DeleteMode::Parameters => Self::Parameters,
            DeleteMode::Inline => Self::Inline,
        }
    }
}

impl Cli {
    /// Builds the consumer configuration.
    pub fn consumer_config(&self) -> Result<ConsumerConfig, ConfigError> {
        ConsumerConfig::builder()
            .id_field(&self.id_field)
            .timestamp_policy(self.timestamp_policy.into())
            .build()
    }

    /// Builds the XTDB configuration.
    ///
    /// Explicit options win over the `XTDB_*` environment defaults.
    pub fn xtdb_config(&self) -> Result<XtdbConfig, XtdbConfigError> {
        self.xtdb_config_from(XtdbConfig::from_env()?)
    }

    fn xtdb_config_from(&self, base: XtdbConfig) -> Result<XtdbConfig, XtdbConfigError> {
        XtdbConfig::builder()
            .url(self.xtdb_url.clone().unwrap_or(base.url))
            .user(self.xtdb_user.clone().unwrap_or(base.user))
            .password(self.xtdb_password.clone().unwrap_or(base.password))
            .application_name(base.application_name)
            .connect_timeout(base.connect_timeout)
            .delete_binding(self.delete_binding.into())
            .build()
    }

    /// Returns the name the offset is stored under.
    pub fn source_name(&self) -> String {
        self.source_name.clone().unwrap_or_else(|| {
            self.input
                .file_name()
                .map_or_else(|| self.input.display().to_string(), |name| name.to_string_lossy().into_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["chronosink-replay"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["/data/orders.jsonl"]);

        assert_eq!(cli.batch_size, 500);
        assert_eq!(cli.source_name(), "orders.jsonl");

        let config = cli.consumer_config().unwrap();
        assert_eq!(config.id_field, "id");
        assert_eq!(config.timestamp_policy, TimestampPolicy::Reject);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(Cli::try_parse_from(["chronosink-replay", "in.json", "--batch-size", "0"]).is_err());
    }

    #[test]
    fn test_options_override_base_config() {
        let cli = parse(&[
            "in.json",
            "--xtdb-url",
            "postgres://xtdb.internal:5432/xtdb",
            "--xtdb-user",
            "ingest",
            "--delete-binding",
            "inline",
            "--timestamp-policy",
            "processing-time",
            "--source-name",
            "orders",
        ]);

        let config = cli.xtdb_config_from(XtdbConfig::default()).unwrap();
        assert_eq!(config.url, "postgres://xtdb.internal:5432/xtdb");
        assert_eq!(config.user, "ingest");
        assert_eq!(config.password, "xtdb");
        assert_eq!(config.delete_binding, DeleteBinding::Inline);
        assert_eq!(
            cli.consumer_config().unwrap().timestamp_policy,
            TimestampPolicy::ProcessingTime
        );
        assert_eq!(cli.source_name(), "orders");
    }

    #[test]
    fn test_metadata_id_field_rejected() {
        let cli = parse(&["in.json", "--id-field", "__op"]);
        assert!(cli.consumer_config().is_err());
    }
}
