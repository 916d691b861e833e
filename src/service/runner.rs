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

//! Wiring between configuration, clients and the two run loops.

use std::io::Write;

use chrono::Local;
use tracing::{error, info, warn};

use crate::client::{ConsumerClient, MemoryBroker, ProducerClient};
use crate::consume::{
    run_consumer, BatchAccumulator, BatchHandler, ConsumeSettings, ConsumerStats,
    PrintBatchHandler,
};
use crate::message::{Batch, DeliveryStats};
use crate::produce::{
    run_publisher, BackpressureProducer, PublishSettings, PublisherStats, TemperatureSensor,
};

use super::{AppConfig, AppError, AppResult, Shutdown};

fn consume_settings(config: &AppConfig) -> ConsumeSettings {
    ConsumeSettings {
        batch_size: config.consumer.batch_size,
        batch_timeout: config.consumer.batch_timeout(),
    }
}

fn publish_settings(config: &AppConfig, max_messages: Option<u64>) -> PublishSettings {
    PublishSettings {
        topic: config.producer.topic.clone(),
        interval: config.producer.interval(),
        flush_timeout: config.producer.flush_timeout(),
        max_messages,
    }
}

fn sensor(config: &AppConfig) -> TemperatureSensor {
    TemperatureSensor::new(config.producer.initial_reading, config.producer.drift)
}

/// Subscribe `consumer` to the configured topics and print every batch to
/// stdout until shutdown or the first broker error.
pub async fn run_consume<C: ConsumerClient>(
    mut consumer: C,
    config: &AppConfig,
    shutdown: &Shutdown,
) -> AppResult<ConsumerStats> {
    let topics = &config.consumer.topics;
    if let Err(source) = consumer.subscribe(topics) {
        error!("Failed to subscribe to {} topics: {}", topics.len(), source);
        return Err(AppError::SubscribeError {
            topics: topics.join(","),
            source,
        });
    }
    info!(
        "consuming {} in batches of {} every {}ms",
        config.consumer.topics.join(","),
        config.consumer.batch_size,
        config.consumer.batch_timeout_ms
    );
    let mut handler = PrintBatchHandler::stdout();
    run_consumer(
        BatchAccumulator::new(consumer),
        &mut handler,
        consume_settings(config),
        shutdown,
    )
    .await
}

/// Publish sensor readings to the configured topic until shutdown, or until
/// `max_messages` cycles have run.
pub async fn run_produce<C: ProducerClient>(
    client: C,
    config: &AppConfig,
    max_messages: Option<u64>,
    shutdown: &Shutdown,
) -> PublisherStats {
    info!(
        "publishing to {} every {}ms",
        config.producer.topic, config.producer.interval_ms
    );
    let producer = BackpressureProducer::new(client, config.producer.retry.build(), shutdown.clone());
    let mut source = sensor(config);
    run_publisher(
        producer,
        &mut source,
        &publish_settings(config, max_messages),
        shutdown,
    )
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoReport {
    pub published: PublisherStats,
    pub consumed: ConsumerStats,
    pub delivered: u64,
    pub failed: u64,
}

/// Round-trip `messages` sensor readings through an in-process broker,
/// writing batch reports to `out`.
///
/// The consumer stops once it has seen every reading, or after the publisher
/// finished and a whole batch window came back empty.
pub async fn run_demo<W: Write + Send>(
    config: &AppConfig,
    messages: u64,
    out: W,
    shutdown: &Shutdown,
) -> AppResult<DemoReport> {
    let started_at = Local::now();
    let broker = MemoryBroker::new();
    let topic = config.producer.topic.clone();
    broker.create_topic(&topic, 1)?;

    let stats = DeliveryStats::new();
    let client = broker.producer(config.producer.queue_capacity, stats.clone());
    let producer = BackpressureProducer::new(client, config.producer.retry.build(), shutdown.clone());
    let mut consumer = broker.consumer(&config.consumer.group_id, config.consumer.auto_offset_reset);
    consumer.subscribe(&[topic])?;

    let publisher_done = Shutdown::new();
    let consumer_done = shutdown.child();

    let publish = async {
        let mut source = sensor(config);
        let published = run_publisher(
            producer,
            &mut source,
            &publish_settings(config, Some(messages)),
            shutdown,
        )
        .await;
        publisher_done.trigger();
        published
    };

    let mut printer = PrintBatchHandler::new(out);
    let mut received = 0_u64;
    let mut handler = |batch: Batch| -> AppResult<()> {
        let empty = batch.is_empty();
        received += batch.len() as u64;
        if !empty {
            printer.handle(batch)?;
        }
        if received >= messages || (empty && publisher_done.is_shutdown()) {
            consumer_done.trigger();
        }
        Ok(())
    };
    let consume = run_consumer(
        BatchAccumulator::new(consumer),
        &mut handler,
        consume_settings(config),
        &consumer_done,
    );

    let (published, consumed) = tokio::join!(publish, consume);
    let consumed = consumed?;

    let report = DemoReport {
        published,
        consumed,
        delivered: stats.delivered(),
        failed: stats.failed(),
    };
    if report.consumed.messages < report.delivered {
        warn!(
            "demo consumed {} of {} delivered readings",
            report.consumed.messages, report.delivered
        );
    }
    if report.failed > 0 {
        error!("{} readings failed delivery", report.failed);
    }
    info!(
        "demo started at {} finished: {} published, {} consumed in {} batches",
        started_at.format("%Y-%m-%d %H:%M:%S"),
        report.published.enqueued,
        report.consumed.messages,
        report.consumed.cycles
    );
    Ok(report)
}
