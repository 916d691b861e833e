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

//! In-process broker.
//!
//! Topics are partitioned append-only logs held in memory. Producers keep a
//! bounded local queue that only drains inside `poll`/`flush`, the same way
//! librdkafka's producer queue behaves, so congestion can be reproduced
//! deterministically. Consumers wait on a [`Notify`] bounded by the pull
//! timeout, which makes them usable on tokio's paused test clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::message::{DeliveryHandler, DeliveryOutcome, Message};

use super::{validate_topic, BrokerError, ConsumerClient, ProducerClient, Pulled};

const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;

/// Where a consumer starts reading a partition it has no position for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<Bytes>>,
}

#[derive(Debug)]
struct BrokerInner {
    topics: DashMap<String, TopicLog>,
    default_partitions: usize,
    max_message_size: usize,
    round_robin: AtomicU32,
    /// woken on every append
    appended: Notify,
    available: AtomicBool,
    /// woken when `available` flips
    availability_changed: Notify,
    consumer_faults: Mutex<VecDeque<BrokerError>>,
    rejected_topics: DashMap<String, String>,
}

/// Shared handle to an in-memory broker. Clones talk to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Topics created implicitly get `partitions` partitions.
    pub fn with_partitions(partitions: usize) -> Self {
        MemoryBroker {
            inner: Arc::new(BrokerInner {
                topics: DashMap::new(),
                default_partitions: partitions.max(1),
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                round_robin: AtomicU32::new(0),
                appended: Notify::new(),
                available: AtomicBool::new(true),
                availability_changed: Notify::new(),
                consumer_faults: Mutex::new(VecDeque::new()),
                rejected_topics: DashMap::new(),
            }),
        }
    }

    pub fn create_topic(&self, topic: &str, partitions: usize) -> Result<(), BrokerError> {
        validate_topic(topic)?;
        self.inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog {
                partitions: vec![Vec::new(); partitions.max(1)],
            });
        Ok(())
    }

    /// Append directly to a topic log, bypassing any producer queue.
    /// Returns the partition and offset the payload landed at.
    pub fn append(&self, topic: &str, payload: Bytes) -> Result<(i32, i64), BrokerError> {
        validate_topic(topic)?;
        let position = {
            let mut log = self
                .inner
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog {
                    partitions: vec![Vec::new(); self.inner.default_partitions],
                });
            let partition_count = log.partitions.len() as u32;
            let partition =
                (self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % partition_count) as usize;
            let records = &mut log.partitions[partition];
            records.push(payload);
            (partition as i32, records.len() as i64 - 1)
        };
        trace!(
            "appended to {} [{}] at offset {}",
            topic,
            position.0,
            position.1
        );
        self.inner.appended.notify_waiters();
        Ok(position)
    }

    /// Number of records in a partition, `None` if it does not exist.
    pub fn high_watermark(&self, topic: &str, partition: i32) -> Option<i64> {
        let log = self.inner.topics.get(topic)?;
        let records = log.partitions.get(usize::try_from(partition).ok()?)?;
        Some(records.len() as i64)
    }

    /// While unavailable, producer queues stop draining.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        self.inner.availability_changed.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// The next pull of any consumer on this broker fails with `err`.
    pub fn inject_consumer_error(&self, err: BrokerError) {
        self.inner.consumer_faults.lock().push_back(err);
        self.inner.appended.notify_waiters();
    }

    /// Deliveries to `topic` are reported as failed with `reason`.
    pub fn reject_topic(&self, topic: &str, reason: &str) {
        self.inner
            .rejected_topics
            .insert(topic.to_string(), reason.to_string());
    }

    pub fn producer(
        &self,
        queue_capacity: usize,
        handler: impl DeliveryHandler + 'static,
    ) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            queue: VecDeque::with_capacity(queue_capacity),
            queue_capacity,
            handler: Box::new(handler),
            closed: false,
        }
    }

    pub fn consumer(&self, group_id: &str, offset_reset: OffsetReset) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            group_id: group_id.to_string(),
            offset_reset,
            subscriptions: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    fn deliver(&self, topic: String, payload: Bytes) -> DeliveryOutcome {
        if let Some(reason) = self.inner.rejected_topics.get(&topic) {
            return DeliveryOutcome::Failed {
                topic,
                reason: reason.value().clone(),
            };
        }
        match self.append(&topic, payload) {
            Ok((partition, offset)) => DeliveryOutcome::Delivered {
                topic,
                partition,
                offset,
            },
            Err(err) => DeliveryOutcome::Failed {
                topic,
                reason: err.to_string(),
            },
        }
    }
}

/// Producer with a bounded local queue.
pub struct MemoryProducer {
    broker: MemoryBroker,
    queue: VecDeque<(String, Bytes)>,
    queue_capacity: usize,
    handler: Box<dyn DeliveryHandler>,
    closed: bool,
}

impl MemoryProducer {
    /// Drain the whole local queue if the broker is accepting records.
    fn drain(&mut self) -> usize {
        if !self.broker.is_available() {
            return 0;
        }
        let mut served = 0;
        while let Some((topic, payload)) = self.queue.pop_front() {
            let outcome = self.broker.deliver(topic, payload);
            self.handler.on_delivery(&outcome);
            served += 1;
        }
        served
    }
}

impl ProducerClient for MemoryProducer {
    fn send(&mut self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        validate_topic(topic)?;
        let max = self.broker.inner.max_message_size;
        if payload.len() > max {
            return Err(BrokerError::MessageTooLarge {
                size: payload.len(),
                max,
            });
        }
        if self.queue.len() >= self.queue_capacity {
            return Err(BrokerError::QueueFull);
        }
        self.queue.push_back((topic.to_string(), payload));
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> usize {
        // registered before draining, so a broker coming back in between
        // still wakes us
        let broker = self.broker.clone();
        let changed = broker.inner.availability_changed.notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let served = self.drain();
        if served > 0 || timeout.is_zero() {
            return served;
        }
        let _ = time::timeout(timeout, changed).await;
        self.drain()
    }

    async fn flush(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let broker = self.broker.clone();
        loop {
            let changed = broker.inner.availability_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            self.drain();
            if self.queue.is_empty() || Instant::now() >= deadline {
                return self.queue.len();
            }
            let _ = time::timeout_at(deadline, changed).await;
        }
    }

    fn in_flight(&self) -> usize {
        self.queue.len()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let purged = self.queue.len();
        for (topic, _) in self.queue.drain(..) {
            self.handler.on_delivery(&DeliveryOutcome::Failed {
                topic,
                reason: "Local: Purged in queue".to_string(),
            });
        }
        debug!("memory producer closed, {} queued messages purged", purged);
    }
}

pub struct MemoryConsumer {
    broker: MemoryBroker,
    group_id: String,
    offset_reset: OffsetReset,
    subscriptions: Vec<String>,
    /// next offset to read per (topic, partition)
    positions: HashMap<(String, i32), i64>,
    cursor: usize,
    closed: bool,
}

impl MemoryConsumer {
    /// Take the next unread record, visiting partitions round-robin so one
    /// busy partition cannot starve the others.
    fn next_available(&mut self) -> Option<Message> {
        let mut partitions = Vec::new();
        for topic in &self.subscriptions {
            if let Some(log) = self.broker.inner.topics.get(topic) {
                for partition in 0..log.partitions.len() {
                    partitions.push((topic.clone(), partition));
                }
            }
        }
        if partitions.is_empty() {
            return None;
        }

        for step in 0..partitions.len() {
            let (topic, partition) = &partitions[(self.cursor + step) % partitions.len()];
            let key = (topic.clone(), *partition as i32);
            let position = self.positions.get(&key).copied().unwrap_or(0);
            let payload = self
                .broker
                .inner
                .topics
                .get(topic)
                .and_then(|log| log.partitions[*partition].get(position as usize).cloned());
            if let Some(payload) = payload {
                self.positions.insert(key, position + 1);
                self.cursor = (self.cursor + step + 1) % partitions.len();
                return Some(Message::new(
                    topic.clone(),
                    *partition as i32,
                    position,
                    payload,
                ));
            }
        }
        None
    }
}

impl ConsumerClient for MemoryConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if topics.is_empty() {
            return Err(BrokerError::NotSubscribed);
        }
        for topic in topics {
            validate_topic(topic)?;
        }
        self.subscriptions = topics.to_vec();
        self.positions.clear();
        self.cursor = 0;
        if self.offset_reset == OffsetReset::Latest {
            for topic in topics {
                if let Some(log) = self.broker.inner.topics.get(topic) {
                    for (partition, records) in log.partitions.iter().enumerate() {
                        self.positions
                            .insert((topic.clone(), partition as i32), records.len() as i64);
                    }
                }
            }
        }
        debug!(
            "consumer group {} subscribed to {}",
            self.group_id,
            topics.join(",")
        );
        Ok(())
    }

    async fn pull(&mut self, timeout: Duration) -> Pulled {
        if self.closed {
            return Pulled::Failed(BrokerError::Closed);
        }
        if self.subscriptions.is_empty() {
            return Pulled::Failed(BrokerError::NotSubscribed);
        }
        let deadline = Instant::now() + timeout;
        let broker = self.broker.clone();
        loop {
            // register interest before looking, so an append racing with the
            // scan still wakes us
            let appended = broker.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(err) = broker.inner.consumer_faults.lock().pop_front() {
                return Pulled::Failed(err);
            }
            if let Some(message) = self.next_available() {
                return Pulled::Message(message);
            }
            if Instant::now() >= deadline {
                return Pulled::TimedOut;
            }
            let _ = time::timeout_at(deadline, appended).await;
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.subscriptions.clear();
            debug!("consumer group {} closed", self.group_id);
        }
    }
}
