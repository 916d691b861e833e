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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Asynchronous result of a publish, reported once per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        topic: String,
        partition: i32,
        offset: i64,
    },
    Failed {
        topic: String,
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Receives delivery reports.
///
/// Handlers are registered when the producer client is created and run
/// synchronously inside the client's bounded `poll`.
pub trait DeliveryHandler: Send + Sync {
    fn on_delivery(&self, outcome: &DeliveryOutcome);
}

impl<H: DeliveryHandler + ?Sized> DeliveryHandler for Arc<H> {
    fn on_delivery(&self, outcome: &DeliveryOutcome) {
        (**self).on_delivery(outcome)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeliveryHandler;

impl DeliveryHandler for LogDeliveryHandler {
    fn on_delivery(&self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered {
                topic,
                partition,
                offset,
            } => {
                debug!(
                    monotonic_counter.messages_delivered = 1_u64,
                    "message delivered to topic {} [{}] at offset {}", topic, partition, offset
                );
            }
            DeliveryOutcome::Failed { topic, reason } => {
                warn!(
                    monotonic_counter.messages_delivery_failed = 1_u64,
                    "message delivery to topic {} failed: {}", topic, reason
                );
            }
        }
    }
}

/// Counts delivery reports. Clone the `Arc` to read the counters while the
/// client owns the handler.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl DeliveryHandler for DeliveryStats {
    fn on_delivery(&self, outcome: &DeliveryOutcome) {
        if outcome.is_delivered() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        LogDeliveryHandler.on_delivery(outcome);
    }
}
