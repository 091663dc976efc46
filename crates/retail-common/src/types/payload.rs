//! Versioned batch payloads passed between extract, transform and load
//!
//! When the stages run as separate scheduler tasks these are written to disk
//! as JSON; when they run in one process they are passed by value.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ProductRecord, RawProduct, RunContext};
use crate::checksum::{checksum_bytes, verify_checksum};
use crate::error::{EtlError, Result};

/// Current payload layout version
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// Extract → Transform hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub schema_version: u32,
    pub context: RunContext,
    pub rows: Vec<RawProduct>,
}

impl RawBatch {
    pub fn new(context: RunContext, rows: Vec<RawProduct>) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            context,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read and version-check a raw batch file
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let batch: Self = read_json(path)?;
        check_schema_version(batch.schema_version)?;
        Ok(batch)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path, self)
    }
}

/// Transform → Load hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    pub schema_version: u32,
    pub context: RunContext,
    /// SHA-256 of the JSON-serialized `records`
    pub checksum: String,
    pub records: Vec<ProductRecord>,
}

impl BatchPayload {
    /// Seal `records` into a payload, computing its checksum
    pub fn new(context: RunContext, records: Vec<ProductRecord>) -> Result<Self> {
        let checksum = records_checksum(&records)?;
        Ok(Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            context,
            checksum,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check the version, checksum and batch invariants
    ///
    /// Every record must carry the context's `extracted_at` and
    /// `pipeline_version`, and barcodes must be unique.
    pub fn verify(&self) -> Result<()> {
        check_schema_version(self.schema_version)?;
        verify_checksum(&serde_json::to_vec(&self.records)?, &self.checksum)?;

        let mut seen = HashSet::with_capacity(self.records.len());
        for (index, record) in self.records.iter().enumerate() {
            if record.extracted_at != self.context.extracted_at
                || record.pipeline_version != self.context.pipeline_version
            {
                return Err(EtlError::payload(format!(
                    "record {} ({}) is not stamped with the batch run context",
                    index, record.barcode
                )));
            }
            if !seen.insert(record.barcode.as_str()) {
                return Err(EtlError::payload(format!(
                    "duplicate barcode {} at record {}",
                    record.barcode, index
                )));
            }
        }

        Ok(())
    }

    /// Read a payload file and run [`BatchPayload::verify`] on it
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let payload: Self = read_json(path)?;
        payload.verify()?;
        Ok(payload)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path, self)
    }
}

fn records_checksum(records: &[ProductRecord]) -> Result<String> {
    Ok(checksum_bytes(&serde_json::to_vec(records)?))
}

fn check_schema_version(version: u32) -> Result<()> {
    if version != PAYLOAD_SCHEMA_VERSION {
        return Err(EtlError::payload(format!(
            "unsupported schema version {} (expected {})",
            version, PAYLOAD_SCHEMA_VERSION
        )));
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
