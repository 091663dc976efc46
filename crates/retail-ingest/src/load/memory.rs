//! In-process warehouse
//!
//! Same semantics as the Postgres backend, including the barcode primary key
//! and the all-or-nothing promotion. Backs `--dry-run` and the test suite.

use anyhow::{bail, Result};
use async_trait::async_trait;
use retail_common::{AuditEntry, ProductRecord};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::warehouse::Warehouse;

#[derive(Debug, Default)]
struct State {
    dataset_ready: bool,
    staging: Vec<ProductRecord>,
    production: Vec<ProductRecord>,
    audit: Vec<AuditEntry>,
}

/// Warehouse held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `records` already in production
    pub fn with_production(records: Vec<ProductRecord>) -> Self {
        let warehouse = Self::default();
        {
            let mut state = warehouse.state();
            state.dataset_ready = true;
            state.production = records;
        }
        warehouse
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn staging(&self) -> Vec<ProductRecord> {
        self.state().staging.clone()
    }

    pub fn production(&self) -> Vec<ProductRecord> {
        self.state().production.clone()
    }

    /// Audit entries in insertion order
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.state().audit.clone()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_dataset(&self) -> Result<()> {
        self.state().dataset_ready = true;
        Ok(())
    }

    async fn replace_staging(&self, records: &[ProductRecord]) -> Result<u64> {
        let mut state = self.state();
        if !state.dataset_ready {
            bail!("dataset does not exist");
        }

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.barcode.as_str())) {
            bail!("duplicate key value violates primary key: barcode={}", dup.barcode);
        }

        state.staging = records.to_vec();
        Ok(state.staging.len() as u64)
    }

    async fn staging_row_count(&self) -> Result<u64> {
        Ok(self.state().staging.len() as u64)
    }

    async fn promote(&self, expected_rows: u64) -> Result<u64> {
        let mut state = self.state();
        let staged = state.staging.len() as u64;
        if staged != expected_rows {
            bail!("copied {} rows, expected {}; promotion rolled back", staged, expected_rows);
        }
        state.production = state.staging.clone();
        Ok(staged)
    }

    async fn production_row_count(&self) -> Result<u64> {
        Ok(self.state().production.len() as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.state().audit.push(entry.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        Ok(self
            .state()
            .audit
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
