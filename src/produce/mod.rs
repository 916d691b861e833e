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

pub use producer::{BackpressureProducer, PublishOutcome};
pub use publisher_loop::{run_publisher, PublishSettings, PublisherStats};
pub use retry::{
    BoundedRetry, ExponentialBackoff, RetryConfig, RetryPolicy, RetryStrategy, UnboundedRetry,
};
pub use sensor::{render_xml, PayloadSource, TemperatureSensor};

mod producer;
mod publisher_loop;
mod retry;
mod sensor;
