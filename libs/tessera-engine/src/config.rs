use std::time::Duration;

use serde::Deserialize;

use tessera_api::ConsistencyLevel;

use crate::error::DriverError;

/// Driver configuration, parsed from TOML.
///
/// ```toml
/// keyspace = "tester"
/// consistency = "LOCAL_QUORUM"
///
/// [schema_agreement]
/// interval_ms = 200
/// timeout_ms = 10000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Keyspace used for preparation and direct queries when the statement
    /// text does not qualify its tables.
    #[serde(default)]
    pub keyspace: Option<String>,

    /// Consistency level given to bound statements and direct queries.
    #[serde(default)]
    pub consistency: ConsistencyLevel,

    #[serde(default)]
    pub serial_consistency: Option<ConsistencyLevel>,

    /// Per round trip limit; 0 disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub schema_agreement: SchemaAgreementConfig,

    #[serde(default)]
    pub statement_cache: StatementCacheConfig,
}

fn default_request_timeout_ms() -> u64 {
    12_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaAgreementConfig {
    /// Wait for agreement after schema-mutating statements.
    #[serde(default = "default_agreement_enabled")]
    pub enabled: bool,

    #[serde(default = "default_agreement_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_agreement_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_agreement_enabled() -> bool {
    true
}

fn default_agreement_interval_ms() -> u64 {
    200
}

fn default_agreement_timeout_ms() -> u64 {
    10_000
}

impl Default for SchemaAgreementConfig {
    fn default() -> Self {
        Self {
            enabled: default_agreement_enabled(),
            interval_ms: default_agreement_interval_ms(),
            timeout_ms: default_agreement_timeout_ms(),
        }
    }
}

impl SchemaAgreementConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementCacheConfig {
    /// Upper bound on cached statements; the oldest are evicted first.
    /// Unbounded when absent.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            keyspace: None,
            consistency: ConsistencyLevel::default(),
            serial_consistency: None,
            request_timeout_ms: default_request_timeout_ms(),
            schema_agreement: SchemaAgreementConfig::default(),
            statement_cache: StatementCacheConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, DriverError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(e.to_string()).with_context(path))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.schema_agreement.interval_ms == 0 {
            return Err(DriverError::Config("schema_agreement.interval_ms must be positive".into()));
        }
        if let Some(serial) = self.serial_consistency.filter(|level| !level.is_serial()) {
            return Err(DriverError::Config(format!(
                "serial_consistency must be SERIAL or LOCAL_SERIAL, got {serial}"
            )));
        }
        if self.statement_cache.max_entries == Some(0) {
            return Err(DriverError::Config("statement_cache.max_entries must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
