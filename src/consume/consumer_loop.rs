// Copyright 2025 jonefeewang@gmail.com
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

use std::time::Duration;

use tracing::{debug, info};

use crate::client::ConsumerClient;
use crate::{AppResult, Shutdown};

use super::{BatchAccumulator, BatchHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub cycles: u64,
    pub messages: u64,
    /// the loop ended because of a broker error rather than a shutdown
    pub stopped_by_error: bool,
}

/// Accumulate and hand off batches until `shutdown` fires or the broker
/// reports an error.
///
/// The shutdown token is only looked at between cycles; a cycle in progress
/// always runs to its deadline. The consumer is closed before returning.
pub async fn run_consumer<C, H>(
    mut accumulator: BatchAccumulator<C>,
    handler: &mut H,
    settings: ConsumeSettings,
    shutdown: &Shutdown,
) -> AppResult<ConsumerStats>
where
    C: ConsumerClient,
    H: BatchHandler + ?Sized,
{
    let mut stats = ConsumerStats::default();

    let result = loop {
        if shutdown.is_shutdown() {
            debug!("consumer loop received shutdown signal");
            break Ok(());
        }

        let (batch, should_continue) = accumulator
            .accumulate(settings.batch_size, settings.batch_timeout)
            .await;
        stats.cycles += 1;
        stats.messages += batch.len() as u64;
        debug!(
            monotonic_counter.messages_consumed = batch.len() as u64,
            "accumulated batch of {} messages ({} bytes)",
            batch.len(),
            batch.total_bytes()
        );

        if let Err(err) = handler.handle(batch) {
            break Err(err);
        }
        if !should_continue {
            stats.stopped_by_error = true;
            break Ok(());
        }
    };

    let mut consumer = accumulator.into_inner();
    consumer.close();
    info!(
        "consumer stopped after {} cycles, {} messages",
        stats.cycles, stats.messages
    );
    result.map(|_| stats)
}
