//! Shared fixtures for the integration tests
//!
//! - record and batch builders stamped with a fixed run context
//! - [`FaultyWarehouse`], an in-memory warehouse that fails on request
//! - [`StubSource`], a product source that never touches the network

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use retail_common::{
    AuditEntry, BatchPayload, EtlError, ExtractionErrorKind, ProductRecord, QualityFlag,
    RawProduct, RunContext,
};
use retail_ingest::extract::ProductSource;
use retail_ingest::load::{MemoryWarehouse, Warehouse};

// ============================================================================
// Fixtures
// ============================================================================

pub fn record(
    ctx: &RunContext,
    barcode: &str,
    name: &str,
    nutriscore: Option<&str>,
) -> ProductRecord {
    let quality_flag = if name == "Unknown Product" {
        QualityFlag::MissingName
    } else if nutriscore.is_none() {
        QualityFlag::MissingNutriscore
    } else {
        QualityFlag::Ok
    };

    ProductRecord {
        barcode: barcode.to_string(),
        name: name.to_string(),
        category: "Beverages".to_string(),
        brand: "Acme".to_string(),
        quantity: "1 L".to_string(),
        stores: "Unknown Store".to_string(),
        countries: "France".to_string(),
        nutriscore: nutriscore.map(str::to_string),
        observed_at: None,
        extracted_at: ctx.extracted_at,
        pipeline_version: ctx.pipeline_version.clone(),
        quality_flag,
    }
}

/// Three records, the second one without a name
pub fn three_record_payload() -> BatchPayload {
    let ctx = RunContext::new("beverages");
    let records = vec![
        record(&ctx, "3017620422003", "Orange Juice", Some("c")),
        record(&ctx, "5449000000996", "Unknown Product", Some("e")),
        record(&ctx, "3274080005003", "Spring Water", Some("a")),
    ];
    BatchPayload::new(ctx, records).unwrap()
}

/// Production contents left behind by an earlier run
pub fn previous_production() -> Vec<ProductRecord> {
    let ctx = RunContext::new("beverages");
    vec![
        record(&ctx, "1111111111111", "Old Cola", Some("e")),
        record(&ctx, "2222222222222", "Old Lemonade", None),
    ]
}

pub fn raw(code: &str, name: Option<&str>, grade: Option<&str>) -> RawProduct {
    RawProduct {
        code: Some(code.to_string()),
        product_name: name.map(str::to_string),
        nutriscore_grade: grade.map(str::to_string),
        ..Default::default()
    }
}

// ============================================================================
// Fault-injecting warehouse
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Report one row fewer in staging than was written
    StagingCountShort,
    /// Fail every staging write
    StagingWrite,
    /// Fail the promotion call
    Promote,
    /// Fail the audit append
    Audit,
    /// Sleep this long inside the staging write
    SlowStaging(Duration),
}

pub struct FaultyWarehouse {
    pub inner: Arc<MemoryWarehouse>,
    fault: Option<Fault>,
    promote_calls: AtomicUsize,
}

impl FaultyWarehouse {
    pub fn new(fault: Fault) -> Self {
        Self::with_inner(MemoryWarehouse::new(), Some(fault))
    }

    pub fn healthy(inner: impl Into<Arc<MemoryWarehouse>>) -> Self {
        Self::with_inner(inner, None)
    }

    /// Pass an `Arc` to keep the same tables across several loaders
    pub fn with_inner(inner: impl Into<Arc<MemoryWarehouse>>, fault: Option<Fault>) -> Self {
        Self {
            inner: inner.into(),
            fault,
            promote_calls: AtomicUsize::new(0),
        }
    }

    pub fn promote_calls(&self) -> usize {
        self.promote_calls.load(Ordering::SeqCst)
    }

    fn is(&self, f: impl Fn(Fault) -> bool) -> bool {
        self.fault.is_some_and(f)
    }
}

#[async_trait]
impl Warehouse for FaultyWarehouse {
    async fn ensure_dataset(&self) -> Result<()> {
        self.inner.ensure_dataset().await
    }

    async fn replace_staging(&self, records: &[ProductRecord]) -> Result<u64> {
        if let Some(Fault::SlowStaging(delay)) = self.fault {
            tokio::time::sleep(delay).await;
        }
        if self.is(|f| matches!(f, Fault::StagingWrite)) {
            bail!("insert rejected: connection reset by peer");
        }
        self.inner.replace_staging(records).await
    }

    async fn staging_row_count(&self) -> Result<u64> {
        let count = self.inner.staging_row_count().await?;
        if self.is(|f| matches!(f, Fault::StagingCountShort)) {
            return Ok(count.saturating_sub(1));
        }
        Ok(count)
    }

    async fn promote(&self, expected_rows: u64) -> Result<u64> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        if self.is(|f| matches!(f, Fault::Promote)) {
            bail!("could not obtain lock on relation \"products\"");
        }
        self.inner.promote(expected_rows).await
    }

    async fn production_row_count(&self) -> Result<u64> {
        self.inner.production_row_count().await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        if self.is(|f| matches!(f, Fault::Audit)) {
            bail!("audit table is read-only");
        }
        self.inner.append_audit(entry).await
    }

    async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.inner.recent_audit(limit).await
    }
}

// ============================================================================
// Stub product source
// ============================================================================

pub struct StubSource {
    rows: Vec<RawProduct>,
    failure: Option<ExtractionErrorKind>,
    pub calls: AtomicUsize,
}

impl StubSource {
    pub fn returning(rows: Vec<RawProduct>) -> Self {
        Self {
            rows,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(kind: ExtractionErrorKind) -> Self {
        Self {
            rows: Vec::new(),
            failure: Some(kind),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProductSource for StubSource {
    async fn fetch(&self, _category: &str) -> retail_common::Result<Vec<RawProduct>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(kind) => Err(EtlError::extraction(kind, "stubbed failure")),
            None => Ok(self.rows.clone()),
        }
    }
}
