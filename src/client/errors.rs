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

use thiserror::Error;

/// Errors reported by a broker client.
///
/// A pull that times out is not an error, see [`super::Pulled::TimedOut`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Local: Queue full")]
    QueueFull,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),

    #[error("Broker transport failure: {0}")]
    Transport(String),

    #[error("Consumer is not subscribed to any topic")]
    NotSubscribed,

    #[error("Client has been closed")]
    Closed,

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

/// Coarse classification used by the retry and run loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// the local queue is full, recoverable by draining and retrying
    Congestion,
    Fatal,
    /// detected before any broker traffic
    Configuration,
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::QueueFull => ErrorKind::Congestion,
            BrokerError::Config(_) => ErrorKind::Configuration,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_congestion(&self) -> bool {
        self.kind() == ErrorKind::Congestion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(BrokerError::QueueFull.kind(), ErrorKind::Congestion);
        assert!(BrokerError::QueueFull.is_congestion());
        assert_eq!(
            BrokerError::Config("group.id".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            BrokerError::Transport("connection reset".into()).kind(),
            ErrorKind::Fatal
        );
        assert!(!BrokerError::Closed.is_congestion());
    }

    #[test]
    fn test_error_messages() {
        let err = BrokerError::MessageTooLarge { size: 10, max: 4 };
        assert!(err.to_string().contains("10 bytes"));
        assert!(BrokerError::QueueFull.to_string().contains("Queue full"));
    }
}
