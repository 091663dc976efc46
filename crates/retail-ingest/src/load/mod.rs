//! Warehouse loading
//!
//! A batch moves through a fixed sequence of stages:
//!
//! ```text
//! Staging -> Verifying -> Promoting -> Auditing -> Done
//!    |           |            |
//!    +-----------+------------+-----> Auditing -> Failed
//! ```
//!
//! Production is only touched in `Promoting`, and only after the staged row
//! count matched the batch. `Auditing` runs on every path; if the audit write
//! itself fails the load returns [`EtlError::AuditWrite`], which the runner
//! treats as fatal.

pub mod memory;
pub mod postgres;
pub mod warehouse;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;
pub use warehouse::Warehouse;

use std::future::Future;
use std::time::Duration;

use retail_common::{AuditEntry, BatchPayload, EtlError, LoadStatus, Result};
use tracing::{debug, error, info, instrument, warn};

/// Position in the load protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Staging,
    Verifying,
    Promoting,
    Auditing,
    Done,
    Failed,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Staging => "staging",
            Self::Verifying => "verifying",
            Self::Promoting => "promoting",
            Self::Auditing => "auditing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a load whose audit entry was written
#[derive(Debug)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub rows_loaded: u64,
    /// The error that stopped the load, if any
    pub error: Option<EtlError>,
    /// The entry appended to the audit log
    pub audit: AuditEntry,
    /// `Done` or `Failed`
    pub final_stage: LoadStage,
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }

    /// Collapse into the load error, or the loaded row count on success
    pub fn into_result(self) -> Result<u64> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.rows_loaded),
        }
    }
}

/// Drives the staging/verify/promote/audit protocol against a warehouse
pub struct Loader<W> {
    warehouse: W,
    call_timeout: Duration,
}

impl<W: Warehouse> Loader<W> {
    /// `call_timeout` bounds every individual warehouse call
    pub fn new(warehouse: W, call_timeout: Duration) -> Self {
        Self {
            warehouse,
            call_timeout,
        }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Load a sealed batch and record the outcome in the audit log
    ///
    /// Returns `Ok` whenever the audit entry was written, including for
    /// failed loads; inspect [`LoadResult::status`]. Returns `Err` only with
    /// [`EtlError::AuditWrite`].
    #[instrument(skip_all, fields(run_id = %payload.context.run_id, rows = payload.len()))]
    pub async fn load(&self, payload: &BatchPayload) -> Result<LoadResult> {
        let outcome = self.stage_and_promote(payload).await;

        debug!(stage = %LoadStage::Auditing, "Load stage transition");
        let context = &payload.context;
        let audit = match &outcome {
            Ok(rows) => AuditEntry::success(context, *rows),
            Err(err) => AuditEntry::failure(context, err),
        };

        if let Err(audit_err) = self
            .bounded(LoadStage::Auditing, self.warehouse.append_audit(&audit))
            .await
        {
            error!(error = %audit_err, "Audit entry could not be written");
            return Err(match (audit_err, outcome) {
                (EtlError::AuditWrite(message), Err(load_err)) => EtlError::audit_write(format!(
                    "{} (after load error: {})",
                    message, load_err
                )),
                (audit_err, _) => audit_err,
            });
        }

        Ok(match outcome {
            Ok(rows_loaded) => {
                info!(rows_loaded, "Load complete");
                LoadResult {
                    status: LoadStatus::Success,
                    rows_loaded,
                    error: None,
                    audit,
                    final_stage: LoadStage::Done,
                }
            },
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "Load failed, production unchanged");
                LoadResult {
                    status: LoadStatus::Failed,
                    rows_loaded: 0,
                    error: Some(err),
                    audit,
                    final_stage: LoadStage::Failed,
                }
            },
        })
    }

    async fn stage_and_promote(&self, payload: &BatchPayload) -> Result<u64> {
        payload
            .verify()
            .map_err(|e| EtlError::verification(e.to_string()))?;

        if payload.is_empty() {
            return Err(EtlError::verification(
                "batch is empty; refusing to replace production with nothing",
            ));
        }

        let expected = payload.len() as u64;

        debug!(stage = %LoadStage::Staging, "Load stage transition");
        self.bounded(LoadStage::Staging, self.warehouse.ensure_dataset())
            .await?;
        let written = self
            .bounded(
                LoadStage::Staging,
                self.warehouse.replace_staging(&payload.records),
            )
            .await?;
        debug!(written, "Batch written to staging");

        debug!(stage = %LoadStage::Verifying, "Load stage transition");
        let staged = self
            .bounded(LoadStage::Verifying, self.warehouse.staging_row_count())
            .await?;
        if staged != expected {
            return Err(EtlError::row_count_mismatch(expected, staged));
        }

        debug!(stage = %LoadStage::Promoting, "Load stage transition");
        self.bounded(LoadStage::Promoting, self.warehouse.promote(expected))
            .await
    }

    /// Run one warehouse call under the timeout, classifying any failure by
    /// the stage it happened in
    async fn bounded<T, F>(&self, stage: LoadStage, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let message = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => format!("{:#}", err),
            Err(_) => format!(
                "warehouse call timed out after {}s",
                self.call_timeout.as_secs_f64()
            ),
        };

        Err(match stage {
            LoadStage::Staging => EtlError::staging(message),
            LoadStage::Verifying => EtlError::verification(message),
            LoadStage::Promoting => EtlError::promotion(message),
            LoadStage::Auditing | LoadStage::Done | LoadStage::Failed => {
                EtlError::audit_write(message)
            },
        })
    }
}
