//! Retail Ingest Library
//!
//! Batch ETL for retail product data: pulls one product category from the
//! Open Food Facts search API, cleans it, and replaces the warehouse
//! production table through a verified staging table.
//!
//! # Stages
//!
//! - **extract**: paginated HTTP fetch with classified failures
//! - **transform**: deduplication, defaults and quality flags
//! - **load**: staging, row-count verification, promotion and the audit log
//!
//! # Example
//!
//! ```no_run
//! use retail_ingest::config::PipelineConfig;
//! use retail_ingest::extract::OpenFoodFactsClient;
//! use retail_ingest::load::PgWarehouse;
//! use retail_ingest::pipeline::{exit_code, PipelineRunner};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let config = PipelineConfig::load().expect("config");
//!     let source = OpenFoodFactsClient::new(&config.api).expect("client");
//!     let warehouse = PgWarehouse::connect(&config.warehouse).await.expect("warehouse");
//!
//!     let runner = PipelineRunner::new(source, warehouse, config.warehouse.call_timeout());
//!     exit_code(&runner.run("beverages").await)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod transform;

pub use config::PipelineConfig;
pub use extract::{OpenFoodFactsClient, ProductSource};
pub use load::{LoadResult, LoadStage, Loader, MemoryWarehouse, PgWarehouse, Warehouse};
pub use pipeline::{exit_code, exit_status, PipelineRunner, RunSummary};
