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

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::client::{BrokerError, ProducerClient};
use crate::Shutdown;

use super::RetryPolicy;

/// How a single `publish` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// handed to the client queue; delivery is reported later
    Enqueued { attempts: u32 },
    /// rejected by the client with a non-congestion error, not retried
    Dropped { error: BrokerError },
    /// the retry policy ran out while the queue stayed full
    GaveUp { attempts: u32 },
    /// shutdown was requested while waiting for the queue to drain
    Abandoned { attempts: u32 },
}

impl PublishOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PublishOutcome::Enqueued { .. })
    }
}

enum PublishState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Done(PublishOutcome),
}

/// Wraps a producer client with a congestion-aware send loop.
pub struct BackpressureProducer<C, R> {
    client: C,
    policy: R,
    shutdown: Shutdown,
}

impl<C: ProducerClient, R: RetryPolicy> BackpressureProducer<C, R> {
    pub fn new(client: C, policy: R, shutdown: Shutdown) -> Self {
        Self {
            client,
            policy,
            shutdown,
        }
    }

    /// Hand `payload` to the client, retrying only while its local queue is
    /// full. Other errors drop the message. Every call ends with a
    /// non-blocking poll so earlier delivery reports get served.
    pub async fn publish(&mut self, topic: &str, payload: Bytes) -> PublishOutcome {
        let mut state = PublishState::Attempting { attempt: 1 };

        let outcome = loop {
            state = match state {
                PublishState::Attempting { attempt } => {
                    match self.client.send(topic, payload.clone()) {
                        Ok(()) => {
                            debug!(
                                monotonic_counter.messages_enqueued = 1_u64,
                                "Enqueued message ({} bytes) for topic {}",
                                payload.len(),
                                topic
                            );
                            PublishState::Done(PublishOutcome::Enqueued { attempts: attempt })
                        }
                        Err(err) if err.is_congestion() => {
                            warn!("Failed to produce to topic {}: {}", topic, err);
                            PublishState::Retrying { attempt }
                        }
                        Err(err) => {
                            error!(
                                monotonic_counter.messages_dropped = 1_u64,
                                "Failed to produce to topic {}: {}", topic, err
                            );
                            PublishState::Done(PublishOutcome::Dropped { error: err })
                        }
                    }
                }
                PublishState::Retrying { attempt } => {
                    if self.shutdown.is_shutdown() {
                        PublishState::Done(PublishOutcome::Abandoned { attempts: attempt })
                    } else {
                        match self.policy.backoff(attempt) {
                            Some(wait) => {
                                debug!(
                                    monotonic_counter.producer_queue_full = 1_u64,
                                    "producer queue full, draining for {:?} before retry {}",
                                    wait,
                                    attempt
                                );
                                self.client.poll(wait).await;
                                PublishState::Attempting {
                                    attempt: attempt + 1,
                                }
                            }
                            None => {
                                error!(
                                    "giving up on topic {} after {} attempts, queue still full",
                                    topic, attempt
                                );
                                PublishState::Done(PublishOutcome::GaveUp { attempts: attempt })
                            }
                        }
                    }
                }
                PublishState::Done(outcome) => break outcome,
            };
        };

        self.client.poll(Duration::ZERO).await;
        outcome
    }

    /// Wait for outstanding delivery reports, then close the client.
    /// Returns the number of messages that never got a report.
    pub async fn close(&mut self, flush_timeout: Duration) -> usize {
        let remaining = self.client.flush(flush_timeout).await;
        if remaining > 0 {
            warn!(
                "{} messages were not delivered before the flush timeout",
                remaining
            );
        }
        self.client.close();
        remaining
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use super::*;
    use crate::client::MemoryBroker;
    use crate::message::DeliveryStats;
    use crate::produce::{BoundedRetry, UnboundedRetry};

    const WAIT: Duration = Duration::from_millis(100);

    /// Replays scripted send results and records every call.
    #[derive(Default)]
    struct ScriptedProducer {
        send_results: VecDeque<Result<(), BrokerError>>,
        sent: Vec<Bytes>,
        polls: Vec<Duration>,
    }

    impl ProducerClient for ScriptedProducer {
        fn send(&mut self, _topic: &str, payload: Bytes) -> Result<(), BrokerError> {
            let result = self.send_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.sent.push(payload);
            }
            result
        }

        async fn poll(&mut self, timeout: Duration) -> usize {
            self.polls.push(timeout);
            tokio::time::sleep(timeout).await;
            0
        }

        async fn flush(&mut self, _timeout: Duration) -> usize {
            0
        }

        fn in_flight(&self) -> usize {
            0
        }

        fn close(&mut self) {}
    }

    fn scripted(results: Vec<Result<(), BrokerError>>) -> ScriptedProducer {
        ScriptedProducer {
            send_results: results.into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_polls_without_blocking() {
        let mut producer = BackpressureProducer::new(
            scripted(vec![Ok(())]),
            UnboundedRetry { drain_wait: WAIT },
            Shutdown::new(),
        );

        let outcome = producer.publish("t", Bytes::from_static(b"reading")).await;
        assert_eq!(outcome, PublishOutcome::Enqueued { attempts: 1 });
        assert_eq!(producer.client().polls, vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_congestion_error_is_attempted_once() {
        let mut producer = BackpressureProducer::new(
            scripted(vec![Err(BrokerError::MessageTooLarge { size: 9, max: 1 })]),
            UnboundedRetry { drain_wait: WAIT },
            Shutdown::new(),
        );

        let outcome = producer.publish("t", Bytes::from_static(b"too large")).await;
        assert_eq!(
            outcome,
            PublishOutcome::Dropped {
                error: BrokerError::MessageTooLarge { size: 9, max: 1 }
            }
        );
        assert!(producer.client().send_results.is_empty());
        assert!(producer.client().sent.is_empty());
        assert_eq!(producer.client().polls, vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_congestion_drains_then_retries() {
        let mut producer = BackpressureProducer::new(
            scripted(vec![
                Err(BrokerError::QueueFull),
                Err(BrokerError::QueueFull),
                Ok(()),
            ]),
            UnboundedRetry { drain_wait: WAIT },
            Shutdown::new(),
        );

        let start = Instant::now();
        let outcome = producer.publish("t", Bytes::from_static(b"reading")).await;
        assert_eq!(outcome, PublishOutcome::Enqueued { attempts: 3 });
        assert!(start.elapsed() >= 2 * WAIT);
        assert_eq!(producer.client().polls, vec![WAIT, WAIT, Duration::ZERO]);
        // the payload is handed over exactly once
        assert_eq!(producer.client().sent, vec![Bytes::from_static(b"reading")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_gives_up() {
        let mut producer = BackpressureProducer::new(
            scripted(vec![Err(BrokerError::QueueFull); 10]),
            BoundedRetry {
                max_retries: 2,
                drain_wait: WAIT,
            },
            Shutdown::new(),
        );

        let outcome = producer.publish("t", Bytes::from_static(b"reading")).await;
        assert_eq!(outcome, PublishOutcome::GaveUp { attempts: 3 });
        assert_eq!(producer.client().send_results.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_congested_publish() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let stats = DeliveryStats::new();
        let mut client = broker.producer(1, stats.clone());
        client.send("t", Bytes::from_static(b"stuck")).unwrap();

        let shutdown = Shutdown::new();
        let mut producer =
            BackpressureProducer::new(client, UnboundedRetry { drain_wait: WAIT }, shutdown.clone());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let outcome = producer.publish("t", Bytes::from_static(b"next")).await;
        assert!(matches!(outcome, PublishOutcome::Abandoned { attempts } if attempts > 10));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(stats.delivered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_congestion_keeps_retrying_until_drained() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let stats = DeliveryStats::new();
        let mut client = broker.producer(1, stats.clone());
        client.send("t", Bytes::from_static(b"first")).unwrap();

        let mut producer =
            BackpressureProducer::new(client, UnboundedRetry { drain_wait: WAIT }, Shutdown::new());

        let recover = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            recover.set_available(true);
        });

        let outcome = producer.publish("t", Bytes::from_static(b"second")).await;
        assert!(outcome.is_enqueued());
        assert_eq!(producer.close(Duration::from_secs(1)).await, 0);

        assert_eq!(stats.delivered(), 2);
        assert_eq!(broker.high_watermark("t", 0), Some(2));
    }
}
