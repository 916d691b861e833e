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

//! Sensor reading publisher and deadline-bounded batch consumer.
//!
//! The consumer side gathers up to `batch_size` messages per cycle but never
//! waits longer than `batch_timeout` for them; the producer side publishes one
//! reading per tick and retries through local queue congestion.

pub mod client;
pub mod consume;
pub mod message;
pub mod produce;
pub mod service;

pub use client::{BrokerError, ConsumerClient, MemoryBroker, ProducerClient, Pulled};
pub use consume::{run_consumer, BatchAccumulator, BatchHandler, PrintBatchHandler};
pub use message::{Batch, DeliveryHandler, DeliveryOutcome, Message};
pub use produce::{run_publisher, BackpressureProducer, PayloadSource, PublishOutcome, RetryPolicy};
pub use service::{AppConfig, AppError, AppResult, Shutdown};
