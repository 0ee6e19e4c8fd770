use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use co2_mqtt_deepint_connector::config::{Config, LoggingConfig};
use co2_mqtt_deepint_connector::constants::{DEFAULT_CONFIG_PATH, DEFAULT_KEY_SIZE};
use co2_mqtt_deepint_connector::infra::{CsvFailureLog, DeepintCredentials, DeepintSourceClient};
use co2_mqtt_deepint_connector::{cipher, logging, metrics, mqtt};
use co2_mqtt_deepint_connector::{CipherContext, DeepintProducer, RawMessage};

#[derive(Parser)]
#[command(name = "co2_mqtt_deepint_connector")]
#[command(about = "Forwards MQTT CO2 readings to a Deep Intelligence source")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the MQTT broker and forward readings until interrupted
    Serve,
    /// Produce a single batch from arguments, a file (one message per line) or stdin
    Produce {
        #[arg(long)]
        file: Option<PathBuf>,
        messages: Vec<String>,
    },
    /// Decode one message and print the resulting JSON
    Decode {
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = DEFAULT_KEY_SIZE)]
        key_size: usize,
        message: String,
    },
}

fn build_producer(config: &Config) -> anyhow::Result<DeepintProducer> {
    config.validate()?;
    let client = DeepintSourceClient::new(
        &config.deepint.api_url,
        DeepintCredentials::build(config.deepint.auth_token.clone()),
        config.deepint.timeout(),
    )?
    .with_task_polling(
        config.deepint.task_poll_interval(),
        config.deepint.task_poll_attempts,
    );

    Ok(DeepintProducer::new(
        config.route(),
        config.cipher_context()?,
        Arc::new(client),
        Arc::new(CsvFailureLog::new(&config.failure_log.path)),
        config.producer.clone(),
    ))
}

fn read_messages(file: Option<PathBuf>, messages: Vec<String>) -> anyhow::Result<Vec<RawMessage>> {
    if !messages.is_empty() {
        return Ok(messages);
    }
    let lines: Vec<String> = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read messages from {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<_, _>>()
            .context("Failed to read messages from stdin")?,
    };
    Ok(lines.into_iter().filter(|l| !l.trim().is_empty()).collect())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate_for_serve()?;
    let producer = Arc::new(build_producer(&config)?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    info!(
        source_id = %config.deepint.source_id,
        topic = %config.mqtt.topic,
        "starting connector"
    );
    mqtt::run_subscriber(config.mqtt.clone(), producer, shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Decode {
            key,
            key_size,
            message,
        } => {
            let ctx = key
                .map(|k| CipherContext::new(&k, key_size))
                .transpose()?;
            let record = cipher::decode(&message, ctx.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Produce { file, messages } => {
            let config = Config::load(&cli.config)?;
            let _guard = logging::init_logging(&config.logging);
            let producer = build_producer(&config)?;
            let messages = read_messages(file, messages)?;

            let report = producer.produce(&messages).await;
            println!(
                "received={} decoded={} decode_failures={} published={}",
                report.received,
                report.decoded,
                report.decode_failures,
                report.published()
            );
            if let Some(task) = &report.task {
                println!("task_id={}", task.task_id);
            }
        }
        Commands::Serve => {
            let config = match Config::load(&cli.config) {
                Ok(config) => config,
                Err(e) => {
                    let _guard = logging::init_logging(&LoggingConfig::default());
                    error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            };
            let _guard = logging::init_logging(&config.logging);
            if let Some(addr) = config.metrics.listen_addr {
                metrics::init_metrics(addr);
            }
            if let Err(e) = serve(config).await {
                error!("connector stopped: {:#}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}
