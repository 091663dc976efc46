//! Domain types shared by every pipeline stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub mod payload;

pub use payload::{BatchPayload, RawBatch, PAYLOAD_SCHEMA_VERSION};

/// Code revision stamped onto every record and audit entry
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Record Types
// ============================================================================

/// Per-record classification of a known data defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Ok,
    MissingName,
    MissingNutriscore,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::MissingName => "missing_name",
            Self::MissingNutriscore => "missing_nutriscore",
        }
    }
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QualityFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "missing_name" => Ok(Self::MissingName),
            "missing_nutriscore" => Ok(Self::MissingNutriscore),
            other => Err(format!("unknown quality flag: {}", other)),
        }
    }
}

/// One product row as returned by the search API
///
/// Only the columns the pipeline keeps are declared; everything else in the
/// response is dropped during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProduct {
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub brands: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub stores: Option<String>,
    #[serde(default)]
    pub countries: Option<String>,
    #[serde(default)]
    pub nutriscore_grade: Option<String>,
    /// Epoch seconds, sent as a number or a numeric string
    #[serde(default)]
    pub last_modified_t: Option<serde_json::Value>,
}

/// Barcodes occasionally arrive as bare JSON numbers
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Canonical, cleaned product row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub barcode: String,
    pub name: String,
    pub category: String,
    pub brand: String,
    pub quantity: String,
    pub stores: String,
    pub countries: String,
    pub nutriscore: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
    pub extracted_at: DateTime<Utc>,
    pub pipeline_version: String,
    pub quality_flag: QualityFlag,
}

// ============================================================================
// Run Context
// ============================================================================

/// Identity of one pipeline invocation, threaded through transform and load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub category: String,
    pub extracted_at: DateTime<Utc>,
    pub pipeline_version: String,
}

impl RunContext {
    /// Start a new run for `category`, stamped with the current time
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            category: category.into(),
            extracted_at: Utc::now(),
            pipeline_version: PIPELINE_VERSION.to_string(),
        }
    }
}

// ============================================================================
// Audit Types
// ============================================================================

/// Outcome of a load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Success,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown load status: {}", other)),
        }
    }
}

/// One row of the append-only audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: Uuid,
    pub category: String,
    pub run_timestamp: DateTime<Utc>,
    pub status: LoadStatus,
    /// Batch size on success, 0 on failure
    pub rows_loaded: u64,
    /// Populated only on failure
    pub error_message: Option<String>,
    pub pipeline_version: String,
}

impl AuditEntry {
    /// Entry for a load that promoted `rows_loaded` rows
    pub fn success(context: &RunContext, rows_loaded: u64) -> Self {
        Self {
            run_id: context.run_id,
            category: context.category.clone(),
            run_timestamp: Utc::now(),
            status: LoadStatus::Success,
            rows_loaded,
            error_message: None,
            pipeline_version: context.pipeline_version.clone(),
        }
    }

    /// Entry for a load that stopped with `error`
    pub fn failure(context: &RunContext, error: &crate::EtlError) -> Self {
        Self {
            run_id: context.run_id,
            category: context.category.clone(),
            run_timestamp: Utc::now(),
            status: LoadStatus::Failed,
            rows_loaded: 0,
            error_message: Some(error.to_string()),
            pipeline_version: context.pipeline_version.clone(),
        }
    }
}
