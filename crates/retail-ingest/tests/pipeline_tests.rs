//! End-to-end runs with a stub source and an in-memory warehouse

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{raw, Fault, FaultyWarehouse, StubSource};
use retail_common::{EtlError, ExtractionErrorKind, LoadStatus, QualityFlag, RawProduct};
use retail_ingest::load::{MemoryWarehouse, Warehouse};
use retail_ingest::pipeline::{exit_status, PipelineRunner};

const TIMEOUT: Duration = Duration::from_secs(5);

fn sample_rows() -> Vec<RawProduct> {
    vec![
        raw("3017620422003", Some("orange juice"), Some("C")),
        raw("5449000000996", None, Some("e")),
        raw("3274080005003", Some("spring water"), None),
        raw("3017620422003", Some("orange juice duplicate"), Some("a")),
    ]
}

#[tokio::test]
async fn test_run_loads_cleaned_batch() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let runner = PipelineRunner::new(
        StubSource::returning(sample_rows()),
        Arc::clone(&warehouse),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 0);

    let summary = outcome.unwrap();
    assert_eq!(summary.extracted_rows, 4);
    assert_eq!(summary.transformed_rows, 3);
    assert_eq!(summary.load.rows_loaded, 3);

    let production = warehouse.production();
    assert_eq!(production.len(), 3);
    assert_eq!(production[0].name, "Orange Juice");
    assert_eq!(production[0].nutriscore.as_deref(), Some("c"));
    assert_eq!(production[1].quality_flag, QualityFlag::MissingName);
    assert_eq!(production[2].quality_flag, QualityFlag::MissingNutriscore);
    assert!(production
        .iter()
        .all(|r| r.extracted_at == summary.context.extracted_at));

    let audit = warehouse.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].run_id, summary.context.run_id);
    assert_eq!(audit[0].category, "beverages");
    assert_eq!(audit[0].status, LoadStatus::Success);
    assert_eq!(audit[0].rows_loaded, 3);
}

#[tokio::test]
async fn test_extraction_failure_writes_no_audit() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let runner = PipelineRunner::new(
        StubSource::failing(ExtractionErrorKind::RateLimited),
        Arc::clone(&warehouse),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 1);
    assert!(matches!(
        outcome,
        Err(EtlError::Extraction {
            kind: ExtractionErrorKind::RateLimited,
            ..
        })
    ));
    assert!(warehouse.audit_log().is_empty());
    assert!(warehouse.staging().is_empty());
}

#[tokio::test]
async fn test_keyless_row_fails_transform_before_load() {
    let mut keyless = raw("", Some("mystery"), None);
    keyless.code = None;
    let warehouse = Arc::new(MemoryWarehouse::new());
    let runner = PipelineRunner::new(
        StubSource::returning(vec![raw("1", Some("cola"), Some("e")), keyless]),
        Arc::clone(&warehouse),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 1);
    assert!(matches!(outcome, Err(EtlError::Transform(_))));
    assert!(warehouse.audit_log().is_empty());
}

#[tokio::test]
async fn test_empty_extraction_fails_without_touching_production() {
    let before = common::previous_production();
    let warehouse = Arc::new(MemoryWarehouse::with_production(before.clone()));
    let runner = PipelineRunner::new(
        StubSource::returning(Vec::new()),
        Arc::clone(&warehouse),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 1);

    let summary = outcome.unwrap();
    assert_eq!(summary.load.status, LoadStatus::Failed);
    assert_eq!(warehouse.production(), before);
    assert_eq!(warehouse.audit_log()[0].status, LoadStatus::Failed);
}

#[tokio::test]
async fn test_failed_load_exits_nonzero() {
    let runner = PipelineRunner::new(
        StubSource::returning(sample_rows()),
        FaultyWarehouse::new(Fault::Promote),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 1);
    assert_eq!(runner.loader().warehouse().inner.audit_log().len(), 1);
}

#[tokio::test]
async fn test_audit_failure_exits_nonzero() {
    let runner = PipelineRunner::new(
        StubSource::returning(sample_rows()),
        FaultyWarehouse::new(Fault::Audit),
        TIMEOUT,
    );

    let outcome = runner.run("beverages").await;
    assert_eq!(exit_status(&outcome), 1);
    assert!(outcome.unwrap_err().is_fatal());
}

#[tokio::test]
async fn test_each_run_gets_its_own_context() {
    let source = StubSource::returning(sample_rows());
    let runner = PipelineRunner::new(source, Arc::new(MemoryWarehouse::new()), TIMEOUT);

    let first = runner.run("beverages").await.unwrap();
    let second = runner.run("beverages").await.unwrap();

    assert_ne!(first.context.run_id, second.context.run_id);

    let audit = runner.loader().warehouse().recent_audit(10).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].run_id, second.context.run_id);
}

#[tokio::test]
async fn test_extract_stamps_category() {
    let source = StubSource::returning(sample_rows());
    let runner = PipelineRunner::new(source, MemoryWarehouse::new(), TIMEOUT);

    let batch = runner.extract("snacks").await.unwrap();
    assert_eq!(batch.context.category, "snacks");
    assert_eq!(batch.len(), 4);
    assert_eq!(runner.source().calls.load(Ordering::SeqCst), 1);
}
