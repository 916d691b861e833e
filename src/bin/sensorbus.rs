use std::process::ExitCode;

use clap::Parser;
use dotenv::dotenv;
use sensorbus::service::{setup_local_tracing, setup_tracing, Command, CommandLine};
use sensorbus::{AppConfig, AppResult, Shutdown};
use tokio::runtime;
use tracing::error;

fn main() -> ExitCode {
    // .env values feed the SENSORBUS__* overrides
    dotenv().ok();

    let commandline = match CommandLine::try_parse() {
        Ok(commandline) => commandline,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(commandline) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_configuration() => {
            eprintln!("sensorbus: {}", err);
            ExitCode::FAILURE
        }
        Err(err) => {
            // broker failures end the loops, not the process status
            error!("{}", err);
            ExitCode::SUCCESS
        }
    }
}

fn load_config(commandline: &CommandLine) -> AppResult<AppConfig> {
    let (path, required) = commandline.config_path();
    let mut config = AppConfig::set_up_config(path, required)?;
    commandline.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run(commandline: CommandLine) -> AppResult<()> {
    let config = load_config(&commandline)?;
    if let Command::PrintConfig = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        // the demo stays on the console, the broker commands also log to file
        let _otel_guard = match commandline.command {
            Command::Demo(_) => {
                setup_local_tracing(commandline.verbose)?;
                None
            }
            _ => Some(setup_tracing(&config.tracing, commandline.verbose).await?),
        };
        let shutdown = Shutdown::new();
        shutdown.listen_for_signals();

        match &commandline.command {
            Command::Consume(_) => consume(&config, &shutdown).await,
            Command::Produce(args) => produce(&config, args.messages, &shutdown).await,
            Command::Demo(args) => {
                sensorbus::service::run_demo(&config, args.messages, std::io::stdout(), &shutdown)
                    .await
                    .map(|_| ())
            }
            Command::PrintConfig => Ok(()),
        }
    })
}

#[cfg(feature = "kafka")]
async fn consume(config: &AppConfig, shutdown: &Shutdown) -> AppResult<()> {
    let consumer = sensorbus::client::KafkaConsumer::new(&config.consumer_properties())?;
    sensorbus::service::run_consume(consumer, config, shutdown).await?;
    Ok(())
}

#[cfg(feature = "kafka")]
async fn produce(config: &AppConfig, max_messages: Option<u64>, shutdown: &Shutdown) -> AppResult<()> {
    let producer = sensorbus::client::KafkaProducer::new(
        &config.producer_properties(),
        sensorbus::message::LogDeliveryHandler,
    )?;
    sensorbus::service::run_produce(producer, config, max_messages, shutdown).await;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
async fn consume(_config: &AppConfig, _shutdown: &Shutdown) -> AppResult<()> {
    Err(kafka_disabled("consume"))
}

#[cfg(not(feature = "kafka"))]
async fn produce(
    _config: &AppConfig,
    _max_messages: Option<u64>,
    _shutdown: &Shutdown,
) -> AppResult<()> {
    Err(kafka_disabled("produce"))
}

#[cfg(not(feature = "kafka"))]
fn kafka_disabled(command: &str) -> sensorbus::AppError {
    sensorbus::AppError::InvalidValue(format!(
        "`{}` needs a Kafka client; rebuild with `--features kafka`, or try `sensorbus demo`",
        command
    ))
}
