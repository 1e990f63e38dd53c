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

//! Replays a file of captured Debezium change events into XTDB.
//!
//! ```bash
//! XTDB_HOST=localhost chronosink-replay events.jsonl \
//!     --batch-size 1000 \
//!     --offset-file /var/lib/chronosink/offsets.json
//! ```
//!
//! Each batch is one XTDB transaction. The offset file is advanced after each
//! commit, so rerunning after a failure redelivers only the batch that failed.

mod cli;
mod committer;
mod error;
mod runner;
mod source;

use crate::cli::Cli;
use crate::committer::OffsetCommitter;
use crate::error::ReplayError;
use crate::runner::{replay, ReplaySummary};
use chronosink_core::consumer::BatchConsumer;
use chronosink_core::offset::OffsetStore;
use chronosink_stores::{FileOffsetStore, MemoryOffsetStore};
use chronosink_xtdb::XtdbSessionFactory;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Exit status after Ctrl-C, following the shell convention for SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);
    chronosink_core::metrics::init_metrics();

    match run(cli).await {
        Ok(summary) if summary.interrupted => ExitCode::from(EXIT_INTERRUPTED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Replay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ReplaySummary, ReplayError> {
    let consumer_config = cli.consumer_config()?;
    let xtdb_config = cli.xtdb_config()?;
    let source_name = cli.source_name();

    let offsets: Arc<dyn OffsetStore> = match &cli.offset_file {
        Some(path) => Arc::new(FileOffsetStore::open(path).await?),
        None => {
            debug!("No offset file given, offsets are kept in memory");
            Arc::new(MemoryOffsetStore::new())
        }
    };

    if cli.from_start {
        offsets.delete_offset(&source_name).await?;
    }
    let start = offsets.get_offset(&source_name).await?.unwrap_or(0);

    let events = source::load_events(&cli.input, &source_name).await?;
    let skip = usize::try_from(start).unwrap_or(usize::MAX).min(events.len());
    if skip < usize::try_from(start).unwrap_or(usize::MAX) {
        warn!(
            source = %source_name,
            offset = start,
            events = events.len(),
            "Stored offset is past the end of the file, nothing to replay"
        );
    }

    info!(
        input = %cli.input.display(),
        source = %source_name,
        events = events.len(),
        resume_from = start,
        batch_size = cli.batch_size,
        url = %xtdb_config.url,
        "Starting replay"
    );

    let factory = XtdbSessionFactory::new(xtdb_config)?;
    let consumer = BatchConsumer::new(factory, consumer_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing current batch");
            if shutdown_tx.send(true).is_err() {
                debug!("Replay already finished");
            }
        }
    });

    let mut committer = OffsetCommitter::new(Arc::clone(&offsets), source_name, start);
    let result = replay(
        &consumer,
        &events[skip..],
        &mut committer,
        cli.batch_size as usize,
        &shutdown_rx,
    )
    .await;

    let closed = consumer.close().await;
    if let Err(e) = offsets.close().await {
        warn!(error = %e, "Failed to close offset store");
    }

    let summary = match (result, closed) {
        (Ok(summary), Ok(stats)) => {
            info!(
                inserts = stats.inserts,
                updates = stats.updates,
                deletes = stats.deletes,
                offset = committer.position(),
                "Replay complete"
            );
            summary
        }
        (Ok(_), Err(e)) => return Err(ReplayError::Close(e)),
        (Err(e), closed) => {
            if let Err(close) = closed {
                warn!(error = %close, "Failed to close XTDB session after batch failure");
            }
            return Err(e);
        }
    };

    Ok(summary)
}

/// Initialize structured logging
fn init_logging(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
