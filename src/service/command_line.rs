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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::config::parse_property;
use super::AppConfig;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CommandLine {
    /// path to config file (default: ./conf.toml when present)
    #[arg(short, long, global = true)]
    pub conf: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume topics in bounded, time-boxed batches
    Consume(ConsumeArgs),
    /// Publish sensor readings at a fixed cadence
    Produce(ProduceArgs),
    /// Run publisher and batch consumer against an in-process broker
    Demo(DemoArgs),
    PrintConfig,
}

#[derive(Args, Debug, Default)]
pub struct BrokerArgs {
    /// Broker address list (localhost:9092)
    #[arg(short = 'b', long)]
    pub brokers: Option<String>,
    /// Set arbitrary librdkafka configuration property
    #[arg(short = 'X', value_name = "PROP=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Consumer group id
    #[arg(short = 'g', long = "group")]
    pub group_id: Option<String>,
    /// How many messages to batch (default: 100)
    #[arg(short = 'B', long)]
    pub batch_size: Option<usize>,
    /// How long to wait for batch-size to accumulate in milliseconds (default: 1000)
    #[arg(short = 'T', long = "batch-timeout")]
    pub batch_timeout_ms: Option<u64>,
    #[command(flatten)]
    pub broker: BrokerArgs,
    #[arg(required = true, value_name = "TOPIC")]
    pub topics: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ProduceArgs {
    /// Target topic (default: temperature-service)
    #[arg(short = 't', long)]
    pub topic: Option<String>,
    /// Publish interval in milliseconds (default: 800)
    #[arg(short = 'i', long = "interval")]
    pub interval_ms: Option<u64>,
    /// Stop after this many messages
    #[arg(short = 'n', long)]
    pub messages: Option<u64>,
    #[command(flatten)]
    pub broker: BrokerArgs,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// How many readings to round-trip
    #[arg(short = 'n', long, default_value_t = 10)]
    pub messages: u64,
    /// Publish interval in milliseconds
    #[arg(short = 'i', long = "interval", default_value_t = 50)]
    pub interval_ms: u64,
    /// How many messages to batch
    #[arg(short = 'B', long)]
    pub batch_size: Option<usize>,
}

impl CommandLine {
    /// Config file location and whether it must exist.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.conf {
            Some(path) => (PathBuf::from(path), true),
            None => (PathBuf::from("./conf.toml"), false),
        }
    }

    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        match &self.command {
            Command::Consume(args) => args.apply(config),
            Command::Produce(args) => args.apply(config),
            Command::Demo(args) => args.apply(config),
            Command::PrintConfig => {}
        }
    }
}

impl BrokerArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(brokers) = &self.brokers {
            config.general.brokers = brokers.clone();
        }
        config
            .properties
            .extend(self.properties.iter().cloned());
    }
}

impl ConsumeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(group_id) = &self.group_id {
            config.consumer.group_id = group_id.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.consumer.batch_size = batch_size;
        }
        if let Some(batch_timeout_ms) = self.batch_timeout_ms {
            config.consumer.batch_timeout_ms = batch_timeout_ms;
        }
        config.consumer.topics = self.topics.clone();
        self.broker.apply(config);
    }
}

impl ProduceArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(topic) = &self.topic {
            config.producer.topic = topic.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.producer.interval_ms = interval_ms;
        }
        self.broker.apply(config);
    }
}

impl DemoArgs {
    fn apply(&self, config: &mut AppConfig) {
        config.producer.interval_ms = self.interval_ms;
        if let Some(batch_size) = self.batch_size {
            config.consumer.batch_size = batch_size;
        }
    }
}
