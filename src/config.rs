use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub broker: BrokerConfig,
    pub relay: RelayConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            log: LogConfig::load(),
            broker: BrokerConfig::load(),
            relay: RelayConfig::load(),
        }
    }
}

// --- MODULES ---

// LOG
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl LogConfig {
    /// Readable before any subscriber exists: the level is a plain string and never warns.
    pub fn load() -> Self {
        Self {
            level: get_env("LOGPULL_LOG", "info".to_string()),
        }
    }
}

// BROKER
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub partition: i32,
    pub reconnect_backoff_ms: u64,
    pub request_deadline_ms: u64,
    pub long_poll_ms: u64,
    pub short_poll_ms: u64,
    pub fetch_max_bytes: i32,
    pub fetch_max_wait_ms: i32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["127.0.0.1:9092".to_string()],
            partition: 0,
            reconnect_backoff_ms: 3_000,
            request_deadline_ms: 10_000,
            long_poll_ms: 300_000,
            short_poll_ms: 100,
            fetch_max_bytes: 1_000_000,
            fetch_max_wait_ms: 500,
        }
    }
}

impl BrokerConfig {
    fn load() -> Self {
        let defaults = Self::default();
        let brokers = split_list(&get_env("BROKER_ADDRS", defaults.brokers.join(",")));
        Self {
            brokers: if brokers.is_empty() { defaults.brokers } else { brokers },
            partition:            defaults.partition,
            reconnect_backoff_ms: get_env("BROKER_RECONNECT_BACKOFF_MS", defaults.reconnect_backoff_ms),
            request_deadline_ms:  get_env("BROKER_REQUEST_DEADLINE_MS", defaults.request_deadline_ms),
            long_poll_ms:         get_env("BROKER_LONG_POLL_MS", defaults.long_poll_ms),
            short_poll_ms:        get_env("BROKER_SHORT_POLL_MS", defaults.short_poll_ms),
            fetch_max_bytes:      get_env("BROKER_FETCH_MAX_BYTES", defaults.fetch_max_bytes),
            fetch_max_wait_ms:    get_env("BROKER_FETCH_MAX_WAIT_MS", defaults.fetch_max_wait_ms),
        }
    }

    /// Time budget of a single consume call.
    pub fn poll_window(&self, immediate: bool) -> Duration {
        if immediate {
            Duration::from_millis(self.short_poll_ms)
        } else {
            Duration::from_millis(self.long_poll_ms)
        }
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Retry budget of one client request (connect, offset query, fetch)
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

// RELAY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Kafka,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Backend::Kafka),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub backend: Backend,
    pub topics: Vec<String>,
    pub poll_ms: u64,
    pub batch: i64,
    pub immediate: bool,
    pub fixture_path: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Kafka,
            topics: Vec::new(),
            poll_ms: 1_000,
            batch: 100,
            immediate: true,
            fixture_path: None,
        }
    }
}

impl RelayConfig {
    fn load() -> Self {
        let defaults = Self::default();
        Self {
            backend:      get_env("RELAY_BACKEND", defaults.backend),
            topics:       split_list(&get_env("RELAY_TOPICS", String::new())),
            poll_ms:      get_env("RELAY_POLL_MS", defaults.poll_ms),
            batch:        get_env("RELAY_BATCH", defaults.batch),
            immediate:    get_env("RELAY_IMMEDIATE", defaults.immediate),
            fixture_path: env::var("RELAY_FIXTURE_PATH").ok().filter(|p| !p.is_empty()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

// --- PRIVATE HELPERS ---

fn get_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config error: {} must be valid, got '{}'. Using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
