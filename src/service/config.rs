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

extern crate config as _;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{validate_topic, OffsetReset};
use crate::produce::RetryConfig;

use super::{AppError, AppResult};

pub const ENV_PREFIX: &str = "SENSORBUS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub client_id: String,
    /// comma separated `host:port` list
    pub brokers: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        GeneralConfig {
            client_id: format!("sensorbus-{}", &id[..8]),
            brokers: "localhost:9092".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group_id: String,
    /// How many messages to batch.
    pub batch_size: usize,
    /// How long to wait for `batch_size` messages to accumulate.
    pub batch_timeout_ms: u64,
    pub auto_offset_reset: OffsetReset,
    pub topics: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            group_id: "sensorbus".to_string(),
            batch_size: 100,
            batch_timeout_ms: 1000,
            auto_offset_reset: OffsetReset::Earliest,
            topics: Vec::new(),
        }
    }
}

impl ConsumerConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub topic: String,
    /// publish cadence
    pub interval_ms: u64,
    /// how long to wait for outstanding delivery reports on shutdown
    pub flush_timeout_ms: u64,
    /// maximum number of messages in the local producer queue
    pub queue_capacity: usize,
    pub initial_reading: f64,
    /// maximum change of the simulated reading per cycle, 0 keeps it constant
    pub drift: f64,
    pub retry: RetryConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            topic: "temperature-service".to_string(),
            interval_ms: 800,
            flush_timeout_ms: 5000,
            queue_capacity: 100_000,
            initial_reading: 98.6,
            drift: 0.0,
            retry: RetryConfig::default(),
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub log_dir: String,
    pub file_name: String,
    /// export spans and metrics through OTLP
    pub otlp: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            log_dir: "logs".to_string(),
            file_name: "sensorbus.log".to_string(),
            otlp: false,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
    /// librdkafka properties applied on top of everything else
    pub properties: BTreeMap<String, String>,
    pub tracing: TracingConfig,
}

impl AppConfig {
    /// Load the config file at `path` layered with `SENSORBUS__*` environment
    /// variables. A missing file is an error only when `required` is set.
    pub fn set_up_config<P: AsRef<Path>>(path: P, required: bool) -> AppResult<AppConfig> {
        let path = path.as_ref();
        if path.to_str().is_none() {
            return Err(AppError::InvalidValue(format!(
                "config file path: {}",
                path.to_string_lossy()
            )));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.consumer.batch_size == 0 {
            return Err(AppError::InvalidValue(
                "consumer.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.consumer.group_id.trim().is_empty() {
            return Err(AppError::InvalidValue(
                "consumer.group_id must not be empty".to_string(),
            ));
        }
        for topic in &self.consumer.topics {
            validate_topic(topic)?;
        }
        validate_topic(&self.producer.topic)?;
        if self.producer.interval_ms == 0 {
            return Err(AppError::InvalidValue(
                "producer.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.producer.queue_capacity == 0 {
            return Err(AppError::InvalidValue(
                "producer.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if !self.producer.drift.is_finite() || self.producer.drift < 0.0 {
            return Err(AppError::InvalidValue(format!(
                "producer.drift: {}",
                self.producer.drift
            )));
        }
        if self.general.brokers.trim().is_empty() {
            return Err(AppError::InvalidValue(
                "general.brokers must not be empty".to_string(),
            ));
        }
        if self.properties.keys().any(|key| key.trim().is_empty()) {
            return Err(AppError::InvalidValue(
                "properties must not contain an empty key".to_string(),
            ));
        }
        self.producer.retry.validate()
    }

    /// librdkafka properties for the batch consumer.
    pub fn consumer_properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert("bootstrap.servers".to_string(), self.general.brokers.clone());
        properties.insert("client.id".to_string(), self.general.client_id.clone());
        properties.insert("group.id".to_string(), self.consumer.group_id.clone());
        properties.insert("enable.partition.eof".to_string(), "false".to_string());
        properties.insert(
            "auto.offset.reset".to_string(),
            self.consumer.auto_offset_reset.as_str().to_string(),
        );
        properties.extend(self.properties.clone());
        properties
    }

    /// librdkafka properties for the sensor publisher.
    pub fn producer_properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert("bootstrap.servers".to_string(), self.general.brokers.clone());
        properties.insert("client.id".to_string(), self.general.client_id.clone());
        properties.insert(
            "queue.buffering.max.messages".to_string(),
            self.producer.queue_capacity.to_string(),
        );
        properties.extend(self.properties.clone());
        properties
    }
}

/// Parse a `key=value` property override.
pub fn parse_property(raw: &str) -> AppResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(AppError::InvalidValue(format!(
            "Expected property=value, not {}",
            raw
        ))),
    }
}
