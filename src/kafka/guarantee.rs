//! Delivery guarantee levels and the client options they select

/// Replica acknowledgment requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    /// Do not wait for the broker
    None,
    /// Wait for the partition leader only
    #[default]
    Leader,
    /// Wait for every in-sync replica
    All,
}

impl Acks {
    /// Parse from configuration string (`0`, `1`, `all`/`-1`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "0" | "none" => Some(Acks::None),
            "1" | "leader" => Some(Acks::Leader),
            "all" | "-1" => Some(Acks::All),
            _ => None,
        }
    }

    /// librdkafka `acks` value
    pub fn as_config_value(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// Guarantee requested by a producer
///
/// `None`, `Leader` and `All` only change durability. `Idempotent` and
/// `Transactional` additionally cap in-flight requests at one, require full
/// acknowledgment and allow a bounded number of automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    None,
    Leader,
    All,
    Idempotent,
    Transactional,
}

impl DeliveryGuarantee {
    /// Acknowledgment level this guarantee needs
    pub fn acks(&self) -> Acks {
        match self {
            DeliveryGuarantee::None => Acks::None,
            DeliveryGuarantee::Leader => Acks::Leader,
            DeliveryGuarantee::All
            | DeliveryGuarantee::Idempotent
            | DeliveryGuarantee::Transactional => Acks::All,
        }
    }

    /// Whether the broker deduplicates retried sends for this guarantee
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            DeliveryGuarantee::Idempotent | DeliveryGuarantee::Transactional
        )
    }

    /// Whether sends are retried automatically on transient failures
    pub fn retries_on_transient(&self) -> bool {
        self.is_idempotent()
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, DeliveryGuarantee::Transactional)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryGuarantee::None => "none",
            DeliveryGuarantee::Leader => "leader",
            DeliveryGuarantee::All => "all",
            DeliveryGuarantee::Idempotent => "idempotent",
            DeliveryGuarantee::Transactional => "transactional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "fire-and-forget" => Some(DeliveryGuarantee::None),
            "leader" => Some(DeliveryGuarantee::Leader),
            "all" => Some(DeliveryGuarantee::All),
            "idempotent" => Some(DeliveryGuarantee::Idempotent),
            "transactional" => Some(DeliveryGuarantee::Transactional),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer isolation level
///
/// Controls visibility of transactional records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// See every record, including those of open or aborted transactions
    #[default]
    ReadUncommitted,
    /// Only see records from committed transactions
    ReadCommitted,
}

impl IsolationLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "read_uncommitted" => Some(IsolationLevel::ReadUncommitted),
            "read_committed" => Some(IsolationLevel::ReadCommitted),
            _ => None,
        }
    }

    pub fn as_config_value(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
        }
    }
}

/// Starting position when a group has no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl AutoOffsetReset {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Some(AutoOffsetReset::Earliest),
            "latest" | "largest" | "end" => Some(AutoOffsetReset::Latest),
            _ => None,
        }
    }

    pub fn as_config_value(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}
