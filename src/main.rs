//! Hosted service: a timed producer and a logging consumer on one topic
//!
//! Settings resolve as command-line flags, then `KAFKA_*` environment
//! variables, then defaults. Ctrl-C stops both services.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_delivery::{
    Config, DeliveryGuarantee, Envelope, HandlerError, KafkaConnector, MessageBus, MessageHandler,
};

#[derive(Debug, Parser)]
#[command(name = "kafka-delivery", version, about = "Reliable Kafka producer/consumer service")]
struct Args {
    /// Broker list (host:port,...)
    #[arg(long)]
    bootstrap_servers: Option<String>,

    #[arg(long)]
    topic: Option<String>,

    /// Consumer group (defaults to the host name)
    #[arg(long)]
    group_id: Option<String>,

    /// none, leader, all, idempotent or transactional
    #[arg(long)]
    guarantee: Option<String>,

    /// Milliseconds between produced messages
    #[arg(long)]
    produce_interval_ms: Option<u64>,

    /// Only run the consumer
    #[arg(long)]
    no_producer: bool,

    /// Log level filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(v) = &self.bootstrap_servers {
            config.bootstrap_servers = v.clone();
        }
        if let Some(v) = &self.topic {
            config.topic = v.clone();
        }
        if let Some(v) = &self.group_id {
            config.group_id = Some(v.clone());
        }
        if let Some(v) = &self.guarantee {
            config.guarantee = DeliveryGuarantee::parse(v)
                .with_context(|| format!("unknown delivery guarantee '{}'", v))?;
        }
        if let Some(v) = self.produce_interval_ms {
            config.produce_interval_ms = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

/// Logs every consumed message
struct LogMessages;

impl MessageHandler<String> for LogMessages {
    fn handle(&mut self, message: String, envelope: &Envelope) -> Result<(), HandlerError> {
        info!(
            partition = envelope.partition,
            offset = envelope.offset,
            "Consumed: {}",
            message
        );
        Ok(())
    }
}

/// Send `Mensagem - {timestamp}` every interval until cancelled
async fn run_producer(bus: Arc<MessageBus<KafkaConnector>>, token: CancellationToken) {
    let topic = bus.config().topic.clone();
    let mut ticker = tokio::time::interval(bus.config().produce_interval());
    info!(topic = %topic, "producer is start.");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let message = format!("Mensagem - {}", timestamp());
                match bus.produce(&topic, &message).await {
                    Ok(report) => info!(
                        partition = report.partition,
                        offset = report.offset,
                        "Produced: {}",
                        message
                    ),
                    Err(e) => error!(error = %e, "Produce failed"),
                }
            }
        }
    }

    info!(topic = %topic, "producer is stopping.");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.apply(Config::from_env()?)?;
    info!(
        bootstrap_servers = %config.bootstrap_servers,
        topic = %config.topic,
        guarantee = %config.guarantee,
        "Starting kafka-delivery"
    );

    let bus = Arc::new(MessageBus::kafka(config)?);
    let token = CancellationToken::new();

    let topic = bus.config().topic.clone();
    let subscription = bus.consume::<String, _>(&topic, LogMessages, None, token.clone())?;
    info!(topic = %topic, "consumer is start.");

    let producer = if args.no_producer {
        None
    } else {
        Some(tokio::spawn(run_producer(bus.clone(), token.clone())))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    token.cancel();

    if let Some(task) = producer {
        task.await.context("producer task failed")?;
    }

    let report = tokio::task::spawn_blocking(move || subscription.join())
        .await
        .context("consumer join failed")??;
    info!(
        topic = %report.topic,
        received = report.stats.received,
        committed = report.stats.committed,
        dead_lettered = report.stats.dead_lettered,
        "consumer is stopping."
    );

    Ok(())
}
