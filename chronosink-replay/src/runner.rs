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

//! The replay loop.

use crate::committer::OffsetCommitter;
use crate::error::ReplayError;
use chronosink_core::consumer::{BatchConsumer, RawEvent};
use chronosink_core::session::SessionFactory;
use tokio::sync::watch;
use tracing::{info, warn};

/// Totals for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Batches committed
    pub batches: usize,
    /// Events acknowledged
    pub events: usize,
    /// Records written
    pub written: usize,
    /// Control events skipped
    pub skipped: usize,
    /// Stopped early by a shutdown request
    pub interrupted: bool,
}

/// Feeds `events` to the consumer in batches of `batch_size`.
///
/// The shutdown flag is checked before each batch; a batch in flight always
/// runs to completion. On failure the committer's pending count is discarded,
/// so its position still names the first uncommitted event.
pub async fn replay<F: SessionFactory>(
    consumer: &BatchConsumer<F>,
    events: &[RawEvent],
    committer: &mut OffsetCommitter,
    batch_size: usize,
    shutdown: &watch::Receiver<bool>,
) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary::default();

    for batch in events.chunks(batch_size.max(1)) {
        if *shutdown.borrow() {
            warn!(offset = committer.position(), "Shutdown requested, stopping between batches");
            summary.interrupted = true;
            break;
        }

        let offset = committer.position();
        match consumer.handle_batch(batch, committer).await {
            Ok(outcome) => {
                summary.batches += 1;
                summary.events += outcome.events;
                summary.written += outcome.written;
                summary.skipped += outcome.skipped;
            }
            Err(source) => {
                committer.discard_pending();
                return Err(ReplayError::Batch { offset, source });
            }
        }
    }

    info!(
        batches = summary.batches,
        events = summary.events,
        written = summary.written,
        skipped = summary.skipped,
        offset = committer.position(),
        "Replay finished"
    );
    Ok(summary)
}
