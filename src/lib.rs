pub mod brokers;
pub mod config;
pub mod relay;

pub use brokers::{Broker, BrokerError, KafkaBroker, MemoryBroker, Messages, OffsetBounds};
pub use config::Config;
