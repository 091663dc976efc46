//! Retail Ingest - product ETL for one category per invocation

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retail_common::logging::{init_logging, LogConfig, LogLevel};
use retail_common::{BatchPayload, RawBatch};
use retail_ingest::config::{PipelineConfig, WarehouseConfig};
use retail_ingest::extract::OpenFoodFactsClient;
use retail_ingest::load::{Loader, MemoryWarehouse, PgWarehouse, Warehouse};
use retail_ingest::pipeline::{exit_status, PipelineRunner};
use retail_ingest::transform;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "retail-ingest")]
#[command(author, version, about = "Retail product ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, transform and load one category
    Run {
        /// Product category tag
        #[arg(default_value = "beverages")]
        category: String,

        /// Load into an in-memory warehouse instead of Postgres
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch a category and write the raw batch to a file
    Extract {
        /// Product category tag
        category: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Turn a raw batch file into a load-ready payload file
    Transform {
        /// Raw batch file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Load a payload file into the warehouse
    Load {
        /// Payload file
        #[arg(short, long)]
        input: PathBuf,

        /// Load into an in-memory warehouse instead of Postgres
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the most recent audit entries as JSON
    Audit {
        /// Number of entries
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("retail-ingest")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {:#}", e);
            log_config
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    match execute(cli.command).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::FAILURE
        },
    }
}

/// Only the subcommands that talk to the API or a warehouse load configuration
async fn execute(command: Command) -> Result<u8> {
    match command {
        Command::Run { category, dry_run } => {
            let config = PipelineConfig::load()?;
            info!(%category, dry_run, "Starting pipeline run");
            let source = OpenFoodFactsClient::new(&config.api)?;
            let warehouse = open_warehouse(&config.warehouse, dry_run).await?;

            let runner = PipelineRunner::new(source, warehouse, config.warehouse.call_timeout());
            let outcome = runner.run(&category).await;
            Ok(exit_status(&outcome))
        },
        Command::Extract { category, output } => {
            let config = PipelineConfig::load()?;
            let source = OpenFoodFactsClient::new(&config.api)?;
            let runner = PipelineRunner::new(
                source,
                MemoryWarehouse::new(),
                config.warehouse.call_timeout(),
            );

            let batch = runner.extract(&category).await?;
            batch.write_json(&output)?;
            info!(rows = batch.len(), output = %output.display(), "Raw batch written");
            Ok(0)
        },
        Command::Transform { input, output } => {
            let raw = RawBatch::read_json(&input)
                .with_context(|| format!("Failed to read raw batch {}", input.display()))?;
            let payload = transform::transform(raw)?;
            payload.write_json(&output)?;
            info!(
                rows = payload.len(),
                checksum = %payload.checksum,
                output = %output.display(),
                "Payload written"
            );
            Ok(0)
        },
        Command::Load { input, dry_run } => {
            let payload = BatchPayload::read_json(&input)
                .with_context(|| format!("Failed to read payload {}", input.display()))?;
            let config = PipelineConfig::load()?;
            let warehouse = open_warehouse(&config.warehouse, dry_run).await?;

            let loader = Loader::new(warehouse, config.warehouse.call_timeout());
            let rows = loader.load(&payload).await?.into_result()?;
            info!(rows, input = %input.display(), "Payload loaded");
            Ok(0)
        },
        Command::Audit { limit } => {
            let config = PipelineConfig::load()?;
            let warehouse = PgWarehouse::connect(&config.warehouse).await?;
            let entries = warehouse.recent_audit(limit).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(0)
        },
    }
}

async fn open_warehouse(config: &WarehouseConfig, dry_run: bool) -> Result<Arc<dyn Warehouse>> {
    if dry_run {
        info!("Dry run: loading into an in-memory warehouse");
        return Ok(Arc::new(MemoryWarehouse::new()));
    }

    Ok(Arc::new(PgWarehouse::connect(config).await?))
}
