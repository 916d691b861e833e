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

//! librdkafka backed clients.
//!
//! Blocking librdkafka calls (`poll`, `flush`) run under
//! `tokio::task::block_in_place`, so these clients need the multi-threaded
//! runtime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError as RdKafkaError, RDKafkaErrorCode};
use rdkafka::message::{DeliveryResult, Message as _};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer, ProducerContext};
use rdkafka::ClientContext;
use tracing::{debug, warn};

use crate::message::{DeliveryHandler, DeliveryOutcome, Message};

use super::{BrokerError, ConsumerClient, ProducerClient, Pulled};

const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;

fn client_config(properties: &BTreeMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties {
        config.set(key, value);
    }
    config
}

fn map_rdkafka_error(err: &RdKafkaError, topic: &str, size: usize, max: usize) -> BrokerError {
    match err {
        RdKafkaError::ClientConfig(..) => BrokerError::Config(err.to_string()),
        RdKafkaError::MessageProduction(code) | RdKafkaError::MessageConsumption(code) => {
            match code {
                RDKafkaErrorCode::QueueFull => BrokerError::QueueFull,
                RDKafkaErrorCode::MessageSizeTooLarge => BrokerError::MessageTooLarge { size, max },
                RDKafkaErrorCode::InvalidTopic => BrokerError::InvalidTopic(topic.to_string()),
                RDKafkaErrorCode::UnknownTopic
                | RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::UnknownPartition => {
                    BrokerError::UnknownTopicOrPartition(topic.to_string())
                }
                _ => BrokerError::Transport(err.to_string()),
            }
        }
        _ => BrokerError::Transport(err.to_string()),
    }
}

/// Forwards librdkafka delivery reports to the registered handler.
struct DeliveryContext {
    handler: Box<dyn DeliveryHandler>,
    served: AtomicUsize,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(message) => DeliveryOutcome::Delivered {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
            Err((err, message)) => DeliveryOutcome::Failed {
                topic: message.topic().to_string(),
                reason: err.to_string(),
            },
        };
        self.handler.on_delivery(&outcome);
        self.served.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct KafkaProducer {
    producer: BaseProducer<DeliveryContext>,
    max_message_size: usize,
    closed: bool,
}

impl KafkaProducer {
    pub fn new(
        properties: &BTreeMap<String, String>,
        handler: impl DeliveryHandler + 'static,
    ) -> Result<Self, BrokerError> {
        let context = DeliveryContext {
            handler: Box::new(handler),
            served: AtomicUsize::new(0),
        };
        let producer = client_config(properties)
            .create_with_context(context)
            .map_err(|err: RdKafkaError| BrokerError::Config(err.to_string()))?;
        let max_message_size = properties
            .get("message.max.bytes")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);
        Ok(Self {
            producer,
            max_message_size,
            closed: false,
        })
    }

    fn served(&self) -> usize {
        self.producer.context().served.load(Ordering::Relaxed)
    }
}

impl ProducerClient for KafkaProducer {
    fn send(&mut self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let record = BaseRecord::<(), [u8]>::to(topic).payload(payload.as_ref());
        self.producer.send(record).map_err(|(err, _record)| {
            map_rdkafka_error(&err, topic, payload.len(), self.max_message_size)
        })
    }

    async fn poll(&mut self, timeout: Duration) -> usize {
        let before = self.served();
        if timeout.is_zero() {
            self.producer.poll(Duration::ZERO);
        } else {
            tokio::task::block_in_place(|| self.producer.poll(timeout));
        }
        self.served() - before
    }

    async fn flush(&mut self, timeout: Duration) -> usize {
        if let Err(err) = tokio::task::block_in_place(|| self.producer.flush(timeout)) {
            warn!("producer flush: {}", err);
        }
        self.in_flight()
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(
                "kafka producer closed with {} messages in flight",
                self.in_flight()
            );
        }
    }
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    closed: bool,
}

impl KafkaConsumer {
    pub fn new(properties: &BTreeMap<String, String>) -> Result<Self, BrokerError> {
        let consumer = client_config(properties)
            .create::<StreamConsumer>()
            .map_err(|err| BrokerError::Config(err.to_string()))?;
        Ok(Self {
            consumer,
            closed: false,
        })
    }
}

impl ConsumerClient for KafkaConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if topics.is_empty() {
            return Err(BrokerError::NotSubscribed);
        }
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|err| map_rdkafka_error(&err, &topics.join(","), 0, 0))
    }

    async fn pull(&mut self, timeout: Duration) -> Pulled {
        if self.closed {
            return Pulled::Failed(BrokerError::Closed);
        }
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Pulled::TimedOut,
            Ok(Ok(message)) => Pulled::Message(Message::new(
                message.topic(),
                message.partition(),
                message.offset(),
                Bytes::copy_from_slice(message.payload().unwrap_or_default()),
            )),
            Ok(Err(err)) => Pulled::Failed(map_rdkafka_error(&err, "", 0, 0)),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.consumer.unsubscribe();
            debug!("kafka consumer closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::types::RDKafkaConfRes;

    use super::*;
    use crate::client::ErrorKind;

    fn produce_error(code: RDKafkaErrorCode) -> BrokerError {
        map_rdkafka_error(&RdKafkaError::MessageProduction(code), "readings", 2048, 1024)
    }

    #[test]
    fn test_queue_full_is_congestion() {
        let err = produce_error(RDKafkaErrorCode::QueueFull);
        assert_eq!(err, BrokerError::QueueFull);
        assert!(err.is_congestion());
    }

    #[test]
    fn test_message_too_large_keeps_sizes() {
        assert_eq!(
            produce_error(RDKafkaErrorCode::MessageSizeTooLarge),
            BrokerError::MessageTooLarge {
                size: 2048,
                max: 1024
            }
        );
    }

    #[test]
    fn test_unknown_topic_or_partition() {
        for code in [
            RDKafkaErrorCode::UnknownTopicOrPartition,
            RDKafkaErrorCode::UnknownTopic,
            RDKafkaErrorCode::UnknownPartition,
        ] {
            assert_eq!(
                produce_error(code),
                BrokerError::UnknownTopicOrPartition("readings".to_string())
            );
        }
        assert_eq!(
            map_rdkafka_error(
                &RdKafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition),
                "readings",
                0,
                0
            ),
            BrokerError::UnknownTopicOrPartition("readings".to_string())
        );
    }

    #[test]
    fn test_invalid_topic() {
        assert_eq!(
            produce_error(RDKafkaErrorCode::InvalidTopic),
            BrokerError::InvalidTopic("readings".to_string())
        );
    }

    #[test]
    fn test_client_config_is_configuration() {
        let err = map_rdkafka_error(
            &RdKafkaError::ClientConfig(
                RDKafkaConfRes::RD_KAFKA_CONF_INVALID,
                "Invalid value".to_string(),
                "acks".to_string(),
                "sometimes".to_string(),
            ),
            "readings",
            0,
            0,
        );
        assert!(matches!(err, BrokerError::Config(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_other_errors_are_fatal_transport() {
        for err in [
            RdKafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure),
            RdKafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown),
            RdKafkaError::Canceled,
        ] {
            let mapped = map_rdkafka_error(&err, "readings", 0, 0);
            assert!(matches!(mapped, BrokerError::Transport(_)), "{:?}", mapped);
            assert_eq!(mapped.kind(), ErrorKind::Fatal);
        }
    }

    #[test]
    fn test_client_config_copies_properties() {
        let mut properties = BTreeMap::new();
        properties.insert("bootstrap.servers".to_string(), "kafka:9092".to_string());
        properties.insert("enable.partition.eof".to_string(), "false".to_string());
        let config = client_config(&properties);
        assert_eq!(config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(config.get("enable.partition.eof"), Some("false"));
    }
}
