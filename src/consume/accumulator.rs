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

use tokio::time::Instant;
use tracing::{error, trace};

use crate::client::{ConsumerClient, Pulled};
use crate::message::Batch;

const MAX_PREALLOCATED: usize = 1024;

/// Groups pulled messages into batches bounded by size and wall-clock time.
pub struct BatchAccumulator<C> {
    consumer: C,
}

impl<C: ConsumerClient> BatchAccumulator<C> {
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }

    /// Pull until `batch_size` messages are collected or `batch_timeout` has
    /// passed, whichever comes first.
    ///
    /// The deadline is fixed when the call starts; every pull only gets what is
    /// left of it, so a slow trickle of messages cannot stretch the cycle.
    ///
    /// The returned flag is `false` when the consumer hit a broker error and
    /// the caller should stop consuming. Messages collected before the error
    /// are still returned.
    pub async fn accumulate(&mut self, batch_size: usize, batch_timeout: Duration) -> (Batch, bool) {
        let deadline = Instant::now() + batch_timeout;
        let mut batch = Batch::with_capacity(batch_size.min(MAX_PREALLOCATED));

        while batch.len() < batch_size {
            let now = Instant::now();
            if now > deadline {
                break;
            }
            let remaining = deadline - now;

            match self.consumer.pull(remaining).await {
                Pulled::TimedOut => {
                    trace!(
                        "batch timed out with {} of {} messages",
                        batch.len(),
                        batch_size
                    );
                    return (batch, true);
                }
                Pulled::Message(message) => batch.push(message),
                Pulled::Failed(err) => {
                    error!("consumer error: {}", err);
                    return (batch, false);
                }
            }
        }

        (batch, true)
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn into_inner(self) -> C {
        self.consumer
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use bytes::Bytes;
    use rstest::rstest;
    use tokio::time;

    use super::*;
    use crate::client::{BrokerError, MemoryBroker, MemoryConsumer, OffsetReset};
    use crate::message::Message;

    /// Replays a fixed sequence of pull results, each taking `delay`.
    struct ScriptedConsumer {
        script: VecDeque<Pulled>,
        delay: Duration,
        timeouts: Vec<Duration>,
    }

    impl ScriptedConsumer {
        fn new(script: Vec<Pulled>) -> Self {
            Self {
                script: script.into(),
                delay: Duration::ZERO,
                timeouts: Vec::new(),
            }
        }
    }

    impl ConsumerClient for ScriptedConsumer {
        fn subscribe(&mut self, _topics: &[String]) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn pull(&mut self, timeout: Duration) -> Pulled {
            self.timeouts.push(timeout);
            time::sleep(self.delay).await;
            self.script.pop_front().unwrap_or(Pulled::TimedOut)
        }

        fn close(&mut self) {}
    }

    fn message(offset: i64) -> Message {
        Message::new("t", 0, offset, Bytes::from(offset.to_string()))
    }

    fn subscribed(broker: &MemoryBroker, topic: &str) -> BatchAccumulator<MemoryConsumer> {
        let mut consumer = broker.consumer("batch-test", OffsetReset::Earliest);
        consumer.subscribe(&[topic.to_string()]).unwrap();
        BatchAccumulator::new(consumer)
    }

    #[rstest]
    #[case(1, 5)]
    #[case(3, 3)]
    #[case(4, 10)]
    #[case(10, 4)]
    #[tokio::test(start_paused = true)]
    async fn test_batch_never_exceeds_size(#[case] batch_size: usize, #[case] available: usize) {
        let broker = MemoryBroker::with_partitions(3);
        for i in 0..available {
            broker.append("t", Bytes::from(i.to_string())).unwrap();
        }
        let mut accumulator = subscribed(&broker, "t");

        let (batch, should_continue) = accumulator
            .accumulate(batch_size, Duration::from_millis(200))
            .await;
        assert!(should_continue);
        assert_eq!(batch.len(), batch_size.min(available));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_on_silence() {
        let broker = MemoryBroker::new();
        let mut accumulator = subscribed(&broker, "t");

        let start = Instant::now();
        let (batch, should_continue) = accumulator.accumulate(5, Duration::from_secs(1)).await;
        assert!(batch.is_empty());
        assert!(should_continue);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trickle_waits_for_full_deadline() {
        let broker = MemoryBroker::new();
        let mut accumulator = subscribed(&broker, "t");

        broker.append("t", Bytes::from_static(b"first")).unwrap();
        let writer = broker.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            writer.append("t", Bytes::from_static(b"second")).unwrap();
        });

        let start = Instant::now();
        let (batch, should_continue) = accumulator.accumulate(3, Duration::from_millis(1000)).await;
        let elapsed = start.elapsed();

        assert!(should_continue);
        assert_eq!(batch.len(), 2);
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_returns_without_waiting() {
        let broker = MemoryBroker::new();
        for payload in ["a", "b", "c"] {
            broker.append("t", Bytes::from(payload)).unwrap();
        }
        let mut accumulator = subscribed(&broker, "t");

        let start = Instant::now();
        let (batch, should_continue) = accumulator.accumulate(3, Duration::from_secs(10)).await;
        assert!(should_continue);
        assert_eq!(batch.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(1));

        let payloads: Vec<Bytes> = batch.into_iter().map(|m| m.into_payload()).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_partial_batch() {
        let mut accumulator = BatchAccumulator::new(ScriptedConsumer::new(vec![
            Pulled::Message(message(0)),
            Pulled::Message(message(1)),
            Pulled::Failed(BrokerError::Transport("broker went away".into())),
            Pulled::Message(message(2)),
        ]));

        let (batch, should_continue) = accumulator.accumulate(5, Duration::from_secs(1)).await;
        assert!(!should_continue);
        let offsets: Vec<i64> = batch.iter().map(|m| m.offset()).collect();
        assert_eq!(offsets, vec![0, 1]);
        // nothing is pulled past the error
        assert_eq!(accumulator.consumer().script.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_pull_gets_the_remaining_budget() {
        let mut consumer = ScriptedConsumer::new(vec![
            Pulled::Message(message(0)),
            Pulled::Message(message(1)),
            Pulled::TimedOut,
        ]);
        consumer.delay = Duration::from_millis(300);
        let mut accumulator = BatchAccumulator::new(consumer);

        let (batch, should_continue) = accumulator.accumulate(10, Duration::from_millis(1000)).await;
        assert!(should_continue);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            accumulator.consumer().timeouts,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(700),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pull_after_deadline_passed() {
        let mut consumer = ScriptedConsumer::new(vec![
            Pulled::Message(message(0)),
            Pulled::Message(message(1)),
        ]);
        consumer.delay = Duration::from_millis(600);
        let mut accumulator = BatchAccumulator::new(consumer);

        let (batch, should_continue) = accumulator.accumulate(10, Duration::from_millis(500)).await;
        assert!(should_continue);
        assert_eq!(batch.len(), 1);
        assert_eq!(accumulator.consumer().timeouts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_pulls_once() {
        let broker = MemoryBroker::new();
        broker.append("t", Bytes::from_static(b"ready")).unwrap();
        let mut accumulator = subscribed(&broker, "t");

        let (batch, should_continue) = accumulator.accumulate(4, Duration::ZERO).await;
        assert!(should_continue);
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_empty() {
        let broker = MemoryBroker::new();
        broker.append("t", Bytes::from_static(b"ready")).unwrap();
        let mut accumulator = subscribed(&broker, "t");

        let (batch, should_continue) = accumulator.accumulate(0, Duration::from_secs(1)).await;
        assert!(should_continue);
        assert!(batch.is_empty());
    }
}
