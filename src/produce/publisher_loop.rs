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

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::client::ProducerClient;
use crate::Shutdown;

use super::{BackpressureProducer, PayloadSource, PublishOutcome, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub topic: String,
    pub interval: Duration,
    pub flush_timeout: Duration,
    /// stop after this many cycles, `None` runs until shutdown
    pub max_messages: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    pub cycles: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub gave_up: u64,
    /// messages without a delivery report when the client was closed
    pub undelivered: u64,
}

/// Publish one payload per tick until `shutdown` fires.
///
/// Ticks are scheduled from a fixed start so slow publishes do not make the
/// cadence drift. The shutdown token is checked at the top of every cycle and
/// while waiting for the next tick, never inside a publish.
pub async fn run_publisher<C, R, S>(
    mut producer: BackpressureProducer<C, R>,
    source: &mut S,
    settings: &PublishSettings,
    shutdown: &Shutdown,
) -> PublisherStats
where
    C: ProducerClient,
    R: RetryPolicy,
    S: PayloadSource + ?Sized,
{
    let mut stats = PublisherStats::default();
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if shutdown.is_shutdown() {
            debug!("publisher loop received shutdown signal");
            break;
        }
        if settings.max_messages.is_some_and(|max| stats.cycles >= max) {
            break;
        }

        tokio::select! {
            _ = shutdown.recv() => {
                debug!("publisher loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {}
        }

        let payload = source.next_payload();
        stats.cycles += 1;
        match producer.publish(&settings.topic, payload).await {
            PublishOutcome::Enqueued { .. } => stats.enqueued += 1,
            PublishOutcome::Dropped { .. } => stats.dropped += 1,
            PublishOutcome::GaveUp { .. } => stats.gave_up += 1,
            PublishOutcome::Abandoned { .. } => break,
        }
    }

    stats.undelivered = producer.close(settings.flush_timeout).await as u64;
    info!(
        "publisher stopped after {} cycles: {} enqueued, {} dropped, {} undelivered",
        stats.cycles, stats.enqueued, stats.dropped, stats.undelivered
    );
    stats
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::client::MemoryBroker;
    use crate::message::DeliveryStats;
    use crate::produce::{TemperatureSensor, UnboundedRetry};

    fn settings(max_messages: Option<u64>) -> PublishSettings {
        PublishSettings {
            topic: "temperature-service".to_string(),
            interval: Duration::from_millis(800),
            flush_timeout: Duration::from_secs(1),
            max_messages,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_fixed_cadence() {
        let broker = MemoryBroker::new();
        let stats = DeliveryStats::new();
        let producer = BackpressureProducer::new(
            broker.producer(16, stats.clone()),
            UnboundedRetry::default(),
            Shutdown::new(),
        );

        let start = Instant::now();
        let mut sensor = TemperatureSensor::default();
        let result = run_publisher(producer, &mut sensor, &settings(Some(4)), &Shutdown::new()).await;

        assert_eq!(result.cycles, 4);
        assert_eq!(result.enqueued, 4);
        assert_eq!(result.undelivered, 0);
        assert_eq!(stats.delivered(), 4);
        assert_eq!(broker.high_watermark("temperature-service", 0), Some(4));
        // first tick fires immediately, then one every 800ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2400));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_for_tick() {
        let broker = MemoryBroker::new();
        let shutdown = Shutdown::new();
        let producer = BackpressureProducer::new(
            broker.producer(16, DeliveryStats::new()),
            UnboundedRetry::default(),
            shutdown.clone(),
        );

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(1000)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let mut source = || Bytes::from_static(b"x");
        let result = run_publisher(producer, &mut source, &settings(None), &shutdown).await;

        assert_eq!(result.cycles, 2);
        assert!(start.elapsed() < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_messages_do_not_stop_the_loop() {
        let broker = MemoryBroker::new();
        let producer = BackpressureProducer::new(
            broker.producer(16, DeliveryStats::new()),
            UnboundedRetry::default(),
            Shutdown::new(),
        );

        let mut calls = 0;
        let mut source = move || {
            calls += 1;
            if calls % 2 == 0 {
                Bytes::from(vec![0_u8; 2_000_000])
            } else {
                Bytes::from_static(b"ok")
            }
        };
        let mut fast = settings(Some(4));
        fast.interval = Duration::from_millis(10);
        let result = run_publisher(producer, &mut source, &fast, &Shutdown::new()).await;

        assert_eq!(result.cycles, 4);
        assert_eq!(result.enqueued, 2);
        assert_eq!(result.dropped, 2);
    }
}
