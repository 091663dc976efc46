//! End-to-end run for one category
//!
//! Composes extract, transform and load. Each stage hands the next an
//! explicit value; the outcome is mapped to a process exit code.

use std::process::ExitCode;
use std::time::Duration;

use retail_common::{BatchPayload, RawBatch, Result, RunContext};
use tracing::{error, info, instrument};

use crate::extract::ProductSource;
use crate::load::{LoadResult, Loader, Warehouse};
use crate::transform;

/// What a completed run did
#[derive(Debug)]
pub struct RunSummary {
    pub context: RunContext,
    pub extracted_rows: usize,
    pub transformed_rows: usize,
    pub load: LoadResult,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.load.is_success()
    }
}

pub struct PipelineRunner<S, W> {
    source: S,
    loader: Loader<W>,
}

impl<S: ProductSource, W: Warehouse> PipelineRunner<S, W> {
    pub fn new(source: S, warehouse: W, warehouse_timeout: Duration) -> Self {
        Self {
            source,
            loader: Loader::new(warehouse, warehouse_timeout),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn loader(&self) -> &Loader<W> {
        &self.loader
    }

    /// Fetch a category and stamp it with a fresh run context
    pub async fn extract(&self, category: &str) -> Result<RawBatch> {
        let context = RunContext::new(category);
        let rows = self.source.fetch(category).await?;
        info!(run_id = %context.run_id, rows = rows.len(), "Extraction complete");
        Ok(RawBatch::new(context, rows))
    }

    /// Extract, transform and load `category`
    ///
    /// Extraction and transform errors return before the loader runs, so they
    /// leave no audit entry. A returned summary may still carry a failed load.
    #[instrument(skip(self))]
    pub async fn run(&self, category: &str) -> Result<RunSummary> {
        let raw = self.extract(category).await?;
        let extracted_rows = raw.len();

        let payload: BatchPayload = transform::transform(raw)?;
        let transformed_rows = payload.len();

        let load = self.loader.load(&payload).await?;

        Ok(RunSummary {
            context: payload.context,
            extracted_rows,
            transformed_rows,
            load,
        })
    }
}

/// Process status for a run: 0 only when the load finished with a SUCCESS
/// audit entry, 1 otherwise
pub fn exit_status(outcome: &Result<RunSummary>) -> u8 {
    match outcome {
        Ok(summary) if summary.is_success() => {
            info!(
                run_id = %summary.context.run_id,
                extracted = summary.extracted_rows,
                loaded = summary.load.rows_loaded,
                "Pipeline run succeeded"
            );
            0
        },
        Ok(summary) => {
            error!(
                run_id = %summary.context.run_id,
                error = summary.load.audit.error_message.as_deref().unwrap_or("unknown"),
                "Pipeline run failed"
            );
            1
        },
        Err(err) => {
            error!(stage = err.stage(), fatal = err.is_fatal(), error = %err, "Pipeline run failed");
            1
        },
    }
}

pub fn exit_code(outcome: &Result<RunSummary>) -> ExitCode {
    ExitCode::from(exit_status(outcome))
}
