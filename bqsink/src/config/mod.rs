//! Configuration for the ingestion data-plane.
//!
//! Destination and delivery settings with serde defaults and explicit
//! validation. Credential material is deliberately absent: token acquisition
//! lives behind the [`crate::clients::Authenticator`] capability.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid value for {field}: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

/// Time-partitioning specification applied when tables are auto-created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimePartitioningConfig {
    /// Partition granularity: DAY, HOUR, MONTH, or YEAR.
    #[serde(default = "default_partition_type")]
    pub partition_type: String,
    /// Partitioning column; the ingestion-time pseudo column when unset.
    #[serde(default)]
    pub field: Option<String>,
    /// Partition expiration in milliseconds.
    #[serde(default)]
    pub expiration_ms: Option<i64>,
}

impl TimePartitioningConfig {
    const VALID_TYPES: &'static [&'static str] = &["DAY", "HOUR", "MONTH", "YEAR"];

    /// Validates the partitioning specification.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !Self::VALID_TYPES.contains(&self.partition_type.as_str()) {
            return Err(ValidationError::InvalidFieldValue {
                field: "time_partitioning.partition_type".to_string(),
                constraint: "must be one of DAY, HOUR, MONTH, YEAR".to_string(),
            });
        }

        if let Some(expiration_ms) = self.expiration_ms {
            if expiration_ms <= 0 {
                return Err(ValidationError::InvalidFieldValue {
                    field: "time_partitioning.expiration_ms".to_string(),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn default_partition_type() -> String {
    "DAY".to_string()
}

/// Destination and delivery configuration for one output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SinkConfig {
    /// Google Cloud project identifier.
    pub project: String,
    /// BigQuery dataset identifier.
    pub dataset: String,
    /// Destination tables; writes rotate round-robin across the list.
    pub tables: Vec<String>,
    /// Create missing destination tables instead of failing outright.
    #[serde(default)]
    pub auto_create_table: bool,
    /// Partitioning applied when tables are auto-created.
    #[serde(default)]
    pub time_partitioning: Option<TimePartitioningConfig>,
    /// Clustering columns applied when tables are auto-created.
    #[serde(default)]
    pub clustering_fields: Vec<String>,
    /// Ask the warehouse to skip rows that fail validation instead of
    /// rejecting the whole streaming-insert request.
    #[serde(default)]
    pub skip_invalid_rows: bool,
    /// Ask the warehouse to ignore row keys not present in the table schema.
    #[serde(default)]
    pub ignore_unknown_values: bool,
    /// Row field (dotted path allowed) whose value becomes the per-row
    /// `insertId` for best-effort dedup. When unset, rows carry no insert id
    /// and per-row errors are treated as retryable (duplicate-tolerant mode).
    #[serde(default)]
    pub insert_id_field: Option<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long a fetched table schema stays fresh, in seconds.
    #[serde(default = "default_schema_cache_ttl_secs")]
    pub schema_cache_ttl_secs: u64,
    /// Fixed interval between job polls in [`crate::writer::BigQueryWriter::await_job`],
    /// in milliseconds.
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
}

impl SinkConfig {
    /// Default per-request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

    /// Default schema cache freshness window.
    pub const DEFAULT_SCHEMA_CACHE_TTL_SECS: u64 = 600;

    /// Default job polling interval.
    pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 10_000;

    /// Validates the destination specification.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project.is_empty() {
            return Err(ValidationError::MissingField { field: "project" });
        }
        if self.dataset.is_empty() {
            return Err(ValidationError::MissingField { field: "dataset" });
        }
        if self.tables.is_empty() || self.tables.iter().any(|table| table.is_empty()) {
            return Err(ValidationError::InvalidFieldValue {
                field: "tables".to_string(),
                constraint: "must list at least one non-empty table".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "request_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if let Some(time_partitioning) = &self.time_partitioning {
            time_partitioning.validate()?;
        }

        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    SinkConfig::DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_schema_cache_ttl_secs() -> u64 {
    SinkConfig::DEFAULT_SCHEMA_CACHE_TTL_SECS
}

fn default_job_poll_interval_ms() -> u64 {
    SinkConfig::DEFAULT_JOB_POLL_INTERVAL_MS
}
