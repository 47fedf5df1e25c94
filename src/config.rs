// Configuration module for kafka_delivery
//
// Three layers:
// - `Config`: process-level settings read from `KAFKA_*` environment variables
// - `ProducerSettings`: one producer client, derived from a DeliveryGuarantee
// - `ConsumerSettings`: one consumer client on the reliable (manual offset) path
//
// Each settings struct validates the delivery invariants and renders an
// rdkafka `ClientConfig`.

use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::kafka::constants::{
    DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_DEAD_LETTER_SUFFIX,
    DEFAULT_DELIVERY_TIMEOUT_MS, DEFAULT_GROUP_ID, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_MAX_REDELIVERIES, DEFAULT_PARTITIONER, DEFAULT_POLL_TIMEOUT_MS,
    DEFAULT_PRODUCE_INTERVAL_MS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SEND_MAX_RETRIES,
    DEFAULT_TOPIC, DEFAULT_TRANSACTION_TIMEOUT_MS, MAX_MAX_REDELIVERIES, MAX_POLL_TIMEOUT_MS,
    MAX_RETRY_BACKOFF_MS, MAX_SEND_MAX_RETRIES, MIN_POLL_TIMEOUT_MS, RELIABLE_MAX_IN_FLIGHT,
};
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::guarantee::{Acks, AutoOffsetReset, DeliveryGuarantee, IsolationLevel};

/// Producer client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Broker endpoint set (e.g., "kafka1:9092,kafka2:9092")
    pub bootstrap_servers: String,
    pub client_id: String,
    /// Guarantee the controller enforces
    pub guarantee: DeliveryGuarantee,
    pub acks: Acks,
    pub enable_idempotence: bool,
    /// Max unacknowledged requests per connection
    pub max_in_flight: u32,
    /// Automatic retries on transient failures
    pub send_max_retries: u32,
    /// Required for transactional producers
    pub transactional_id: Option<String>,
    /// Transaction coordinator handshake timeout
    pub transaction_timeout_ms: u64,
    /// Time allowed for a delivery report
    pub delivery_timeout_ms: u64,
    /// Key-to-partition strategy (delegated to librdkafka)
    pub partitioner: String,
}

impl ProducerSettings {
    /// Derive the client knobs a guarantee needs
    pub fn for_guarantee(bootstrap_servers: &str, guarantee: DeliveryGuarantee) -> Self {
        let reliable = guarantee.is_idempotent();
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            guarantee,
            acks: guarantee.acks(),
            enable_idempotence: reliable,
            max_in_flight: if reliable {
                RELIABLE_MAX_IN_FLIGHT
            } else {
                DEFAULT_MAX_IN_FLIGHT
            },
            send_max_retries: if reliable { DEFAULT_SEND_MAX_RETRIES } else { 0 },
            transactional_id: guarantee
                .is_transactional()
                .then(|| format!("{}-txn-{}", DEFAULT_CLIENT_ID, uuid::Uuid::new_v4())),
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            partitioner: DEFAULT_PARTITIONER.to_string(),
        }
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    pub fn send_max_retries(mut self, retries: u32) -> Self {
        self.send_max_retries = retries;
        self
    }

    pub fn transactional_id(mut self, id: &str) -> Self {
        self.transactional_id = Some(id.to_string());
        self
    }

    pub fn transaction_timeout_ms(mut self, ms: u64) -> Self {
        self.transaction_timeout_ms = ms;
        self
    }

    pub fn delivery_timeout_ms(mut self, ms: u64) -> Self {
        self.delivery_timeout_ms = ms;
        self
    }

    pub fn partitioner(mut self, partitioner: &str) -> Self {
        self.partitioner = partitioner.to_string();
        self
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Check the guarantee invariants
    ///
    /// Idempotent and transactional producers need full acks, exactly one
    /// in-flight request and a bounded retry count. Plain producers must not
    /// retry on their own.
    pub fn validate(&self) -> DeliveryResult<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig(
                "bootstrap.servers is empty".to_string(),
            ));
        }

        if self.guarantee.is_idempotent() {
            if !self.enable_idempotence {
                return Err(DeliveryError::InvalidConfig(format!(
                    "{} producer requires enable.idempotence=true",
                    self.guarantee
                )));
            }
            if self.acks != Acks::All {
                return Err(DeliveryError::InvalidConfig(format!(
                    "{} producer requires acks=all",
                    self.guarantee
                )));
            }
            if self.max_in_flight != RELIABLE_MAX_IN_FLIGHT {
                return Err(DeliveryError::InvalidConfig(format!(
                    "{} producer requires max.in.flight={}, got {}",
                    self.guarantee, RELIABLE_MAX_IN_FLIGHT, self.max_in_flight
                )));
            }
            if self.send_max_retries > MAX_SEND_MAX_RETRIES {
                return Err(DeliveryError::InvalidConfig(format!(
                    "message.send.max.retries must be at most {}, got {}",
                    MAX_SEND_MAX_RETRIES, self.send_max_retries
                )));
            }
        } else {
            if self.acks != self.guarantee.acks() {
                return Err(DeliveryError::InvalidConfig(format!(
                    "{} producer requires acks={}",
                    self.guarantee,
                    self.guarantee.acks().as_config_value()
                )));
            }
            if self.send_max_retries != 0 {
                return Err(DeliveryError::InvalidConfig(format!(
                    "{} producer does not retry automatically",
                    self.guarantee
                )));
            }
        }

        if self.guarantee.is_transactional()
            && self
                .transactional_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Err(DeliveryError::InvalidConfig(
                "transactional producer requires transactional.id".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the rdkafka client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config.set("bootstrap.servers", &self.bootstrap_servers);
        client_config.set("client.id", &self.client_id);
        client_config.set("acks", self.acks.as_config_value());
        client_config.set("partitioner", &self.partitioner);
        client_config.set("message.timeout.ms", self.delivery_timeout_ms.to_string());

        client_config.set("enable.idempotence", self.enable_idempotence.to_string());
        client_config.set(
            "max.in.flight.requests.per.connection",
            self.max_in_flight.to_string(),
        );
        client_config.set("message.send.max.retries", self.send_max_retries.to_string());

        if let Some(id) = &self.transactional_id {
            if self.guarantee.is_transactional() {
                client_config.set("transactional.id", id);
                client_config.set(
                    "transaction.timeout.ms",
                    // broker-side transaction timeout must exceed the handshake timeout
                    (self.transaction_timeout_ms.max(self.delivery_timeout_ms) + 1_000)
                        .to_string(),
                );
            }
        }

        client_config
    }
}

/// Consumer client settings for the reliable path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub bootstrap_servers: String,
    pub client_id: String,
    /// Consumer group identity
    pub group_id: String,
    pub auto_offset_reset: AutoOffsetReset,
    pub isolation_level: IsolationLevel,
    /// Must stay false: the retry engine commits explicitly
    pub enable_auto_commit: bool,
    /// Must stay false: the retry engine stores explicitly
    pub enable_auto_offset_store: bool,
    /// Emit end-of-partition sentinels
    pub enable_partition_eof: bool,
    /// Blocking poll timeout; bounds cancellation latency
    pub poll_timeout_ms: u64,
    /// Redeliveries before dead-lettering
    pub max_redeliveries: u32,
    /// Delay inserted before each redelivery
    pub retry_backoff_ms: u64,
}

impl ConsumerSettings {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            client_id: short_client_id(),
            group_id: group_id.to_string(),
            auto_offset_reset: AutoOffsetReset::default(),
            isolation_level: IsolationLevel::default(),
            enable_auto_commit: false,
            enable_auto_offset_store: false,
            enable_partition_eof: true,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    pub fn auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.poll_timeout_ms = ms;
        self
    }

    pub fn max_redeliveries(mut self, max: u32) -> Self {
        self.max_redeliveries = max;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> DeliveryResult<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig(
                "bootstrap.servers is empty".to_string(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig("group.id is empty".to_string()));
        }
        if self.enable_auto_commit || self.enable_auto_offset_store {
            return Err(DeliveryError::InvalidConfig(
                "enable.auto.commit and enable.auto.offset.store must be disabled".to_string(),
            ));
        }
        if !(MIN_POLL_TIMEOUT_MS..=MAX_POLL_TIMEOUT_MS).contains(&self.poll_timeout_ms) {
            return Err(DeliveryError::InvalidConfig(format!(
                "poll timeout must be between {} and {} ms, got {}",
                MIN_POLL_TIMEOUT_MS, MAX_POLL_TIMEOUT_MS, self.poll_timeout_ms
            )));
        }
        if self.max_redeliveries > MAX_MAX_REDELIVERIES {
            return Err(DeliveryError::InvalidConfig(format!(
                "max redeliveries must be at most {}, got {}",
                MAX_MAX_REDELIVERIES, self.max_redeliveries
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(DeliveryError::InvalidConfig(format!(
                "retry backoff must be at most {} ms, got {}",
                MAX_RETRY_BACKOFF_MS, self.retry_backoff_ms
            )));
        }
        Ok(())
    }

    /// Render the rdkafka client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config.set("bootstrap.servers", &self.bootstrap_servers);
        client_config.set("client.id", &self.client_id);
        client_config.set("group.id", &self.group_id);
        client_config.set("auto.offset.reset", self.auto_offset_reset.as_config_value());
        client_config.set("isolation.level", self.isolation_level.as_config_value());
        client_config.set("enable.auto.commit", self.enable_auto_commit.to_string());
        client_config.set(
            "enable.auto.offset.store",
            self.enable_auto_offset_store.to_string(),
        );
        client_config.set("enable.partition.eof", self.enable_partition_eof.to_string());

        client_config
    }
}

/// Process-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bootstrap_servers: String,
    pub client_id: String,
    /// None = use the host name
    pub group_id: Option<String>,
    pub topic: String,
    pub guarantee: DeliveryGuarantee,
    pub isolation_level: IsolationLevel,
    pub auto_offset_reset: AutoOffsetReset,
    pub dead_letter_suffix: String,
    pub poll_timeout_ms: u64,
    pub max_redeliveries: u32,
    pub retry_backoff_ms: u64,
    pub send_max_retries: u32,
    pub transaction_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
    pub produce_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            group_id: None,
            topic: DEFAULT_TOPIC.to_string(),
            guarantee: DeliveryGuarantee::Idempotent,
            isolation_level: IsolationLevel::ReadCommitted,
            auto_offset_reset: AutoOffsetReset::Earliest,
            dead_letter_suffix: DEFAULT_DEAD_LETTER_SUFFIX.to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            send_max_retries: DEFAULT_SEND_MAX_RETRIES,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            produce_interval_ms: DEFAULT_PRODUCE_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Load from `KAFKA_*` environment variables, falling back to defaults
    pub fn from_env() -> DeliveryResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> DeliveryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("KAFKA_BOOTSTRAP_SERVERS") {
            config.bootstrap_servers = v;
        }
        if let Some(v) = lookup("KAFKA_CLIENT_ID") {
            config.client_id = v;
        }
        if let Some(v) = lookup("KAFKA_GROUP_ID") {
            config.group_id = Some(v).filter(|g| !g.trim().is_empty());
        }
        if let Some(v) = lookup("KAFKA_TOPIC") {
            config.topic = v;
        }
        if let Some(v) = lookup("KAFKA_GUARANTEE") {
            config.guarantee = DeliveryGuarantee::parse(&v).ok_or_else(|| {
                DeliveryError::InvalidConfig(format!("unknown delivery guarantee '{}'", v))
            })?;
        }
        if let Some(v) = lookup("KAFKA_ISOLATION_LEVEL") {
            config.isolation_level = IsolationLevel::parse(&v).ok_or_else(|| {
                DeliveryError::InvalidConfig(format!("unknown isolation level '{}'", v))
            })?;
        }
        if let Some(v) = lookup("KAFKA_AUTO_OFFSET_RESET") {
            config.auto_offset_reset = AutoOffsetReset::parse(&v).ok_or_else(|| {
                DeliveryError::InvalidConfig(format!("unknown auto.offset.reset '{}'", v))
            })?;
        }
        if let Some(v) = lookup("KAFKA_DLQ_SUFFIX") {
            config.dead_letter_suffix = v;
        }
        if let Some(v) = lookup("KAFKA_POLL_TIMEOUT_MS") {
            config.poll_timeout_ms = parse_number("KAFKA_POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_MAX_REDELIVERIES") {
            config.max_redeliveries = parse_number("KAFKA_MAX_REDELIVERIES", &v)?;
        }
        if let Some(v) = lookup("KAFKA_RETRY_BACKOFF_MS") {
            config.retry_backoff_ms = parse_number("KAFKA_RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_SEND_MAX_RETRIES") {
            config.send_max_retries = parse_number("KAFKA_SEND_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("KAFKA_TRANSACTION_TIMEOUT_MS") {
            config.transaction_timeout_ms = parse_number("KAFKA_TRANSACTION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_DELIVERY_TIMEOUT_MS") {
            config.delivery_timeout_ms = parse_number("KAFKA_DELIVERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KAFKA_PRODUCE_INTERVAL_MS") {
            config.produce_interval_ms = parse_number("KAFKA_PRODUCE_INTERVAL_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate by building both client settings
    pub fn validate(&self) -> DeliveryResult<()> {
        if self.topic.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig("topic is empty".to_string()));
        }
        if self.dead_letter_suffix.is_empty() {
            return Err(DeliveryError::InvalidConfig(
                "dead-letter suffix is empty".to_string(),
            ));
        }
        if self.produce_interval_ms == 0 {
            return Err(DeliveryError::InvalidConfig(
                "produce interval must be positive".to_string(),
            ));
        }
        self.producer_settings().validate()?;
        self.consumer_settings().validate()
    }

    /// Group id, falling back to the host name
    pub fn effective_group_id(&self) -> String {
        self.group_id.clone().unwrap_or_else(default_group_id)
    }

    /// Dead-letter topic for `topic`
    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{}{}", topic, self.dead_letter_suffix)
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        let mut settings = ProducerSettings::for_guarantee(&self.bootstrap_servers, self.guarantee)
            .client_id(&self.client_id)
            .transaction_timeout_ms(self.transaction_timeout_ms)
            .delivery_timeout_ms(self.delivery_timeout_ms);
        if self.guarantee.retries_on_transient() {
            settings = settings.send_max_retries(self.send_max_retries);
        }
        settings
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings::new(&self.bootstrap_servers, &self.effective_group_id())
            .auto_offset_reset(self.auto_offset_reset)
            .isolation_level(self.isolation_level)
            .poll_timeout_ms(self.poll_timeout_ms)
            .max_redeliveries(self.max_redeliveries)
            .retry_backoff_ms(self.retry_backoff_ms)
    }

    pub fn produce_interval(&self) -> Duration {
        Duration::from_millis(self.produce_interval_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> DeliveryResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        DeliveryError::InvalidConfig(format!("{} must be a non-negative integer, got '{}'", name, value))
    })
}

/// Host name, used as the consumer group when none is configured
pub fn default_group_id() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string())
}

/// Five-character client id identifying one consumer within its group
pub fn short_client_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}
