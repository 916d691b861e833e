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

use crate::client::BrokerError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Failed to subscribe to {topics}: {source}")]
    SubscribeError { topics: String, source: BrokerError },
}

impl AppError {
    /// Configuration problems and failed subscriptions stop the process
    /// before any batch is consumed and end it with a non-zero status.
    pub fn is_configuration(&self) -> bool {
        match self {
            AppError::InvalidValue(_)
            | AppError::ConfigFileError(_)
            | AppError::SubscribeError { .. } => true,
            AppError::Broker(err) => err.kind() == crate::client::ErrorKind::Configuration,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(AppError::InvalidValue("batch_size: 0".into()).is_configuration());
        assert!(AppError::from(BrokerError::Config("bootstrap.servers".into())).is_configuration());
        assert!(!AppError::from(BrokerError::QueueFull).is_configuration());
        assert!(!AppError::IllegalStateError("closed".into()).is_configuration());
        assert!(AppError::SubscribeError {
            topics: "temperature-service".into(),
            source: BrokerError::Transport("all brokers down".into()),
        }
        .is_configuration());
    }
}
