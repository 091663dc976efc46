//! Configuration management
//!
//! Everything the pipeline needs from its environment: where the product API
//! lives, which warehouse to write to, and how long remote calls may take.

use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Source API Constants
// ============================================================================

/// Open Food Facts public endpoint. No API key required.
pub const DEFAULT_API_BASE_URL: &str = "https://world.openfoodfacts.org";

/// Products requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound the search endpoint accepts for `page_size`.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pages fetched per run.
pub const DEFAULT_MAX_PAGES: u32 = 1;

/// Per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Warehouse Constants
// ============================================================================

/// Schema holding the production, staging and audit tables.
pub const DEFAULT_DATASET: &str = "retail";

/// Production table name. Staging is `{table}_staging`.
pub const DEFAULT_TABLE: &str = "products";

/// Append-only audit table name.
pub const DEFAULT_AUDIT_TABLE: &str = "pipeline_audit_log";

/// Bound on each staging/verify/promote/audit call, in seconds.
pub const DEFAULT_WAREHOUSE_TIMEOUT_SECS: u64 = 60;

/// A single writer needs very few connections.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 2;

/// Pool acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Postgres truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub warehouse: WarehouseConfig,
}

/// Product API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
}

/// Warehouse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Postgres URL. Only optional for dry runs.
    pub url: Option<String>,
    pub dataset: String,
    pub table: String,
    pub audit_table: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WarehouseConfig {
    pub fn staging_table(&self) -> String {
        format!("{}_staging", self.table)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// The warehouse URL, required for anything but a dry run
    pub fn require_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .ok_or_else(|| EtlError::config("DATABASE_URL not set"))
    }
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build configuration from the process environment only
    pub fn from_env() -> Result<Self> {
        let config = Self {
            api: ApiConfig {
                base_url: std::env::var("RETAIL_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
                page_size: parse_env("RETAIL_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
                max_pages: parse_env("RETAIL_MAX_PAGES", DEFAULT_MAX_PAGES)?,
                timeout_secs: parse_env("RETAIL_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            },
            warehouse: WarehouseConfig {
                url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
                dataset: std::env::var("RETAIL_DATASET")
                    .unwrap_or_else(|_| DEFAULT_DATASET.to_string()),
                table: std::env::var("RETAIL_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
                audit_table: std::env::var("RETAIL_AUDIT_TABLE")
                    .unwrap_or_else(|_| DEFAULT_AUDIT_TABLE.to_string()),
                max_connections: parse_env(
                    "DB_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: parse_env(
                    "DB_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                call_timeout_secs: parse_env(
                    "RETAIL_WAREHOUSE_TIMEOUT_SECS",
                    DEFAULT_WAREHOUSE_TIMEOUT_SECS,
                )?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(EtlError::config("RETAIL_API_BASE_URL cannot be empty"));
        }

        if self.api.page_size == 0 || self.api.page_size > MAX_PAGE_SIZE {
            return Err(EtlError::config(format!(
                "RETAIL_PAGE_SIZE must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.api.page_size
            )));
        }

        if self.api.max_pages == 0 {
            return Err(EtlError::config("RETAIL_MAX_PAGES must be greater than 0"));
        }

        if self.api.timeout_secs == 0 || self.warehouse.call_timeout_secs == 0 {
            return Err(EtlError::config("Timeouts must be greater than 0 seconds"));
        }

        if self.warehouse.max_connections == 0 {
            return Err(EtlError::config("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        let staging = self.warehouse.staging_table();
        for (name, value) in [
            ("RETAIL_DATASET", self.warehouse.dataset.as_str()),
            ("RETAIL_TABLE", self.warehouse.table.as_str()),
            ("RETAIL_TABLE (staging)", staging.as_str()),
            ("RETAIL_AUDIT_TABLE", self.warehouse.audit_table.as_str()),
        ] {
            if !is_valid_identifier(value) {
                return Err(EtlError::config(format!(
                    "{} must be a plain SQL identifier of at most {} bytes, got '{}'",
                    name, MAX_IDENTIFIER_LEN, value
                )));
            }
        }

        if self.warehouse.table == self.warehouse.audit_table {
            return Err(EtlError::config(
                "RETAIL_TABLE and RETAIL_AUDIT_TABLE must differ",
            ));
        }

        if staging == self.warehouse.audit_table {
            return Err(EtlError::config(format!(
                "RETAIL_AUDIT_TABLE '{}' collides with the staging table",
                self.warehouse.audit_table
            )));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_API_BASE_URL.to_string(),
                page_size: DEFAULT_PAGE_SIZE,
                max_pages: DEFAULT_MAX_PAGES,
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            warehouse: WarehouseConfig {
                url: None,
                dataset: DEFAULT_DATASET.to_string(),
                table: DEFAULT_TABLE.to_string(),
                audit_table: DEFAULT_AUDIT_TABLE.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                call_timeout_secs: DEFAULT_WAREHOUSE_TIMEOUT_SECS,
            },
        }
    }
}

/// Identifiers are interpolated into DDL, so only `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {},
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EtlError::config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
