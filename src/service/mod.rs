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

pub use app_error::{AppError, AppResult};
pub use command_line::{
    BrokerArgs, Command, CommandLine, ConsumeArgs, DemoArgs, ProduceArgs,
};
pub use config::{
    parse_property, AppConfig, ConsumerConfig, GeneralConfig, ProducerConfig, TracingConfig,
    ENV_PREFIX,
};
pub use runner::{run_consume, run_demo, run_produce, DemoReport};
pub use shutdown::Shutdown;
pub use tracing_config::{env_filter, setup_local_tracing, setup_tracing, OtelGuard};

mod app_error;
mod command_line;
mod config;
mod runner;
mod shutdown;
mod tracing_config;
