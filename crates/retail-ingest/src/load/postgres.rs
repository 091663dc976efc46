//! Postgres warehouse backend
//!
//! The dataset is a schema. Promotion runs `TRUNCATE` + `INSERT ... SELECT`
//! inside one transaction, so readers see either the old production rows or
//! the new ones and never a mix.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retail_common::{AuditEntry, EtlError, ProductRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::warehouse::Warehouse;
use crate::config::{is_valid_identifier, WarehouseConfig};

/// Rows per INSERT statement. 12 binds per row keeps us far below the
/// 65535 parameter limit.
const INSERT_CHUNK_ROWS: usize = 1000;

const PRODUCT_COLUMNS: &str = "barcode, name, category, brand, quantity, stores, countries, \
     nutriscore, observed_at, extracted_at, pipeline_version, quality_flag";

const AUDIT_COLUMNS: &str =
    "run_id, category, run_timestamp, status, rows_loaded, error_message, pipeline_version";

/// Warehouse backed by a Postgres schema
#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    production: String,
    staging: String,
    audit: String,
    schema: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    run_id: Uuid,
    category: String,
    run_timestamp: DateTime<Utc>,
    status: String,
    rows_loaded: i64,
    error_message: Option<String>,
    pipeline_version: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = anyhow::Error;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEntry {
            run_id: row.run_id,
            category: row.category,
            run_timestamp: row.run_timestamp,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            rows_loaded: u64::try_from(row.rows_loaded)?,
            error_message: row.error_message,
            pipeline_version: row.pipeline_version,
        })
    }
}

impl PgWarehouse {
    /// Open a connection pool using the warehouse configuration
    pub async fn connect(config: &WarehouseConfig) -> retail_common::Result<Self> {
        let url = config.require_url()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| EtlError::staging(format!("Failed to connect to warehouse: {}", e)))?;

        info!(
            max_connections = config.max_connections,
            dataset = %config.dataset,
            "Warehouse connection pool created"
        );

        Self::from_pool(pool, config)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, config: &WarehouseConfig) -> retail_common::Result<Self> {
        let staging = config.staging_table();
        for name in [&config.dataset, &config.table, &staging, &config.audit_table] {
            if !is_valid_identifier(name) {
                return Err(EtlError::config(format!("invalid SQL identifier '{}'", name)));
            }
        }

        Ok(Self {
            pool,
            production: qualified(&config.dataset, &config.table),
            staging: qualified(&config.dataset, &staging),
            audit: qualified(&config.dataset, &config.audit_table),
            schema: format!("\"{}\"", config.dataset),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn create_product_table(&self, table: &str) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                barcode TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                brand TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stores TEXT NOT NULL,
                countries TEXT NOT NULL,
                nutriscore TEXT,
                observed_at TIMESTAMPTZ,
                extracted_at TIMESTAMPTZ NOT NULL,
                pipeline_version TEXT NOT NULL,
                quality_flag TEXT NOT NULL
                    CHECK (quality_flag IN ('ok', 'missing_name', 'missing_nutriscore'))
            )
            "#
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
        Ok(())
    }

    async fn ensure_audit_table(&self) -> Result<()> {
        let schema_ddl = format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema);
        sqlx::query(&schema_ddl).execute(&self.pool).await?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {audit} (
                id BIGSERIAL PRIMARY KEY,
                run_id UUID NOT NULL,
                category TEXT NOT NULL,
                run_timestamp TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('SUCCESS', 'FAILED')),
                rows_loaded BIGINT NOT NULL CHECK (rows_loaded >= 0),
                error_message TEXT,
                pipeline_version TEXT NOT NULL
            )
            "#,
            audit = self.audit
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .context("Failed to create audit table")?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count)?)
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("\"{}\".\"{}\"", schema, table)
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_dataset(&self) -> Result<()> {
        self.ensure_audit_table().await?;
        self.create_product_table(&self.production).await?;
        self.create_product_table(&self.staging).await?;
        debug!(schema = %self.schema, "Dataset ready");
        Ok(())
    }

    async fn replace_staging(&self, records: &[ProductRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("TRUNCATE {}", self.staging))
            .execute(&mut *tx)
            .await
            .context("Failed to truncate staging")?;

        let mut written = 0u64;
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", self.staging, PRODUCT_COLUMNS));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.barcode.as_str())
                    .push_bind(record.name.as_str())
                    .push_bind(record.category.as_str())
                    .push_bind(record.brand.as_str())
                    .push_bind(record.quantity.as_str())
                    .push_bind(record.stores.as_str())
                    .push_bind(record.countries.as_str())
                    .push_bind(record.nutriscore.as_deref())
                    .push_bind(record.observed_at)
                    .push_bind(record.extracted_at)
                    .push_bind(record.pipeline_version.as_str())
                    .push_bind(record.quality_flag.as_str());
            });
            written += builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert staging rows")?
                .rows_affected();
        }

        tx.commit().await?;

        debug!(rows = written, table = %self.staging, "Staging replaced");
        Ok(written)
    }

    async fn staging_row_count(&self) -> Result<u64> {
        self.count(&self.staging).await
    }

    async fn promote(&self, expected_rows: u64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("TRUNCATE {}", self.production))
            .execute(&mut *tx)
            .await
            .context("Failed to truncate production")?;

        let copy = format!(
            "INSERT INTO {prod} ({cols}) SELECT {cols} FROM {staging}",
            prod = self.production,
            staging = self.staging,
            cols = PRODUCT_COLUMNS
        );
        let copied = sqlx::query(&copy)
            .execute(&mut *tx)
            .await
            .context("Failed to copy staging into production")?
            .rows_affected();

        if copied != expected_rows {
            tx.rollback().await?;
            bail!(
                "copied {} rows, expected {}; promotion rolled back",
                copied,
                expected_rows
            );
        }

        tx.commit().await?;

        debug!(rows = copied, table = %self.production, "Production replaced");
        Ok(copied)
    }

    async fn production_row_count(&self) -> Result<u64> {
        self.count(&self.production).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.ensure_audit_table().await?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.audit, AUDIT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(entry.run_id)
            .bind(&entry.category)
            .bind(entry.run_timestamp)
            .bind(entry.status.as_str())
            .bind(i64::try_from(entry.rows_loaded)?)
            .bind(&entry.error_message)
            .bind(&entry.pipeline_version)
            .execute(&self.pool)
            .await
            .context("Failed to insert audit entry")?;

        Ok(())
    }

    async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.ensure_audit_table().await?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY id DESC LIMIT $1",
            AUDIT_COLUMNS, self.audit
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
