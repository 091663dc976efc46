//! Retail ETL common library
//!
//! Shared types, error taxonomy, and logging for the retail product pipeline.
//!
//! - **Error Handling**: [`EtlError`] classifies failures by pipeline stage
//! - **Types**: product records, quality flags, audit entries, run context
//!   and the versioned batch payloads passed between stages
//! - **Checksums**: SHA-256 digests sealing batch payloads
//! - **Logging**: `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use retail_common::{BatchPayload, Result};
//!
//! fn inspect(path: &str) -> Result<()> {
//!     let payload = BatchPayload::read_json(path)?;
//!     tracing::info!(rows = payload.len(), "Payload verified");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{EtlError, ExtractionErrorKind, Result};
pub use types::{
    AuditEntry, BatchPayload, LoadStatus, ProductRecord, QualityFlag, RawBatch, RawProduct,
    RunContext, PIPELINE_VERSION,
};
