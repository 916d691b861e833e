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

//! Broker client capability.
//!
//! The batch consumer and the backpressure producer only talk to the broker
//! through [`ProducerClient`] and [`ConsumerClient`]. Every call that may
//! block carries an explicit upper bound.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::message::Message;

pub use errors::{BrokerError, ErrorKind};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer};
pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer, OffsetReset};

mod errors;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;

/// Result of a single bounded pull.
#[derive(Debug)]
pub enum Pulled {
    Message(Message),
    /// nothing arrived within the timeout, not an error
    TimedOut,
    Failed(BrokerError),
}

const MAX_TOPIC_NAME_LEN: usize = 249;

/// Kafka topic naming rules: 1 to 249 characters out of `[a-zA-Z0-9._-]`.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() || topic.len() > MAX_TOPIC_NAME_LEN || topic == "." || topic == ".." {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    let legal = topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !legal {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

pub trait ProducerClient: Send {
    /// Hand a payload to the client's local queue. Delivery is reported later
    /// through the registered delivery handler, from inside [`Self::poll`].
    fn send(&mut self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Service delivery callbacks, waiting at most `timeout` for at least one.
    /// Returns how many callbacks fired.
    fn poll(&mut self, timeout: Duration) -> impl Future<Output = usize> + Send;

    /// Wait until every queued message has a delivery report, or `timeout`
    /// passes. Returns how many messages are still outstanding.
    fn flush(&mut self, timeout: Duration) -> impl Future<Output = usize> + Send;

    /// Number of messages handed to `send` that have no delivery report yet.
    fn in_flight(&self) -> usize;

    fn close(&mut self);
}

pub trait ConsumerClient: Send {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait at most `timeout` for the next message.
    fn pull(&mut self, timeout: Duration) -> impl Future<Output = Pulled> + Send;

    fn close(&mut self);
}
