//! Warehouse storage interface
//!
//! The loader drives the staging/promotion protocol through this trait. An
//! implementation only has to provide the primitive table operations; it
//! does not decide which error class a failure belongs to.

use anyhow::Result;
use async_trait::async_trait;
use retail_common::{AuditEntry, ProductRecord};
use std::sync::Arc;

/// Three tables addressed by one dataset: production, staging and audit
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the dataset and all three tables if they do not exist
    async fn ensure_dataset(&self) -> Result<()>;

    /// Replace the staging table's contents with `records`
    ///
    /// Returns the number of rows written. Prior staging contents must be gone
    /// afterwards even if a previous attempt left partial data behind.
    async fn replace_staging(&self, records: &[ProductRecord]) -> Result<u64>;

    /// Count rows currently in staging
    async fn staging_row_count(&self) -> Result<u64>;

    /// Make staging the new production contents, all or nothing
    ///
    /// If the number of rows copied differs from `expected_rows` the
    /// replacement must be rolled back and production left as it was.
    async fn promote(&self, expected_rows: u64) -> Result<u64>;

    /// Count rows currently in production
    async fn production_row_count(&self) -> Result<u64>;

    /// Append one entry to the audit log. Never updates existing entries.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Most recent audit entries, newest first
    async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
impl<T: Warehouse + ?Sized> Warehouse for Arc<T> {
    async fn ensure_dataset(&self) -> Result<()> {
        (**self).ensure_dataset().await
    }

    async fn replace_staging(&self, records: &[ProductRecord]) -> Result<u64> {
        (**self).replace_staging(records).await
    }

    async fn staging_row_count(&self) -> Result<u64> {
        (**self).staging_row_count().await
    }

    async fn promote(&self, expected_rows: u64) -> Result<u64> {
        (**self).promote(expected_rows).await
    }

    async fn production_row_count(&self) -> Result<u64> {
        (**self).production_row_count().await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        (**self).append_audit(entry).await
    }

    async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        (**self).recent_audit(limit).await
    }
}
