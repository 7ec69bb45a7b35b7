use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use logpull::brokers::{Broker, KafkaBroker, MemoryBroker};
use logpull::config::{Backend, Config, LogConfig};
use logpull::relay::{Delivery, Relay, Sink};

/// Writes every delivery to stdout as a JSON line
struct StdoutSink;

impl Sink for StdoutSink {
    fn deliver(&self, delivery: Delivery) {
        match delivery.to_json_line() {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{}", line) {
                    tracing::error!("Failed to write delivery: {}", e);
                }
            }
            Err(e) => tracing::error!(topic = %delivery.topic, "Failed to encode delivery: {}", e),
        }
    }
}

// ========================================
// MAIN ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    // Subscriber first, so warnings from loading the rest of the config are emitted
    dotenv::dotenv().ok();
    let log = LogConfig::load();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::global();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    let broker: Arc<dyn Broker> = match config.relay.backend {
        Backend::Kafka => Arc::new(KafkaBroker::new(config.broker.clone())),
        Backend::Memory => match &config.relay.fixture_path {
            Some(path) => match MemoryBroker::from_fixture_file(path) {
                Ok(broker) => Arc::new(broker),
                Err(e) => {
                    tracing::error!("Failed to load fixture {}: {}", path, e);
                    return;
                }
            },
            None => Arc::new(MemoryBroker::new()),
        },
    };

    if broker.initialize(&cancel).await.is_err() {
        tracing::info!("Shutdown before the broker connected");
        return;
    }

    if config.relay.topics.is_empty() {
        tracing::warn!("RELAY_TOPICS is empty, nothing to relay");
    }

    let relay = Arc::new(Relay::new(broker.clone(), config.relay.clone()));
    relay.run(cancel, Arc::new(StdoutSink)).await;

    broker.close_connections().await;
}
