//! Record cleaning and quality classification
//!
//! Pure row processing: no I/O, no clock reads. The run context passed in
//! supplies the only time value the records carry besides `observed_at`.
//!
//! Processing order for a batch:
//! 1. reject rows without a barcode
//! 2. drop duplicate barcodes, keeping the first occurrence
//! 3. fill defaults and normalize text
//! 4. stamp run metadata and classify quality

mod text;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use retail_common::{
    BatchPayload, EtlError, ProductRecord, QualityFlag, RawBatch, RawProduct, Result, RunContext,
};
use tracing::{info, instrument, warn};

pub use text::title_case;

// ============================================================================
// Defaults
// ============================================================================

pub const UNKNOWN_NAME: &str = "Unknown Product";
pub const UNKNOWN_CATEGORY: &str = "Uncategorized";
pub const UNKNOWN_BRAND: &str = "Unknown Brand";
pub const UNKNOWN_STORE: &str = "Unknown Store";
pub const UNKNOWN_COUNTRY: &str = "Unknown Country";
pub const UNKNOWN_QUANTITY: &str = "Unknown";

/// Grades the API uses when it has no score
const NUTRISCORE_ABSENT: &[&str] = &["unknown", "not_rated"];

/// A row with every required field present, not yet stamped
#[derive(Debug, Clone, PartialEq)]
pub struct FilledRow {
    pub barcode: String,
    pub name: String,
    pub category: String,
    pub brand: String,
    pub quantity: String,
    pub stores: String,
    pub countries: String,
    pub nutriscore: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

fn barcode_of(row: &RawProduct) -> Option<&str> {
    text::clean(row.code.as_deref())
}

/// Remove rows whose barcode was already seen, keeping the first occurrence
///
/// Input order is preserved. Rows without a barcode pass through untouched;
/// [`fill_defaults`] rejects them.
pub fn deduplicate(rows: Vec<RawProduct>) -> Vec<RawProduct> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| match barcode_of(row) {
            Some(code) => seen.insert(code.to_string()),
            None => true,
        })
        .collect()
}

/// Replace every absent field with its default and normalize text
///
/// Fails only when the barcode is missing, since nothing can stand in for it.
pub fn fill_defaults(row: RawProduct) -> Result<FilledRow> {
    let barcode = barcode_of(&row)
        .ok_or_else(|| EtlError::transform("row has no barcode"))?
        .to_string();

    let titled = |value: Option<&str>, default: &str| {
        text::clean(value).map_or_else(|| default.to_string(), title_case)
    };

    Ok(FilledRow {
        name: titled(row.product_name.as_deref(), UNKNOWN_NAME),
        category: titled(row.categories.as_deref(), UNKNOWN_CATEGORY),
        brand: titled(row.brands.as_deref(), UNKNOWN_BRAND),
        stores: titled(row.stores.as_deref(), UNKNOWN_STORE),
        countries: titled(row.countries.as_deref(), UNKNOWN_COUNTRY),
        quantity: text::clean(row.quantity.as_deref())
            .unwrap_or(UNKNOWN_QUANTITY)
            .to_string(),
        nutriscore: normalize_nutriscore(row.nutriscore_grade.as_deref()),
        observed_at: row.last_modified_t.as_ref().and_then(epoch_to_datetime),
        barcode,
    })
}

fn normalize_nutriscore(grade: Option<&str>) -> Option<String> {
    text::clean(grade)
        .map(str::to_lowercase)
        .filter(|g| !NUTRISCORE_ABSENT.contains(&g.as_str()))
}

/// Epoch seconds to a timestamp. Unparseable values become `None`.
fn epoch_to_datetime(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        },
        _ => None,
    }?;
    DateTime::from_timestamp(secs, 0)
}

/// Classify a filled row. Name is checked before nutriscore.
pub fn classify_quality(row: &FilledRow) -> QualityFlag {
    if row.name.is_empty() || row.name == UNKNOWN_NAME {
        QualityFlag::MissingName
    } else if row.nutriscore.is_none() {
        QualityFlag::MissingNutriscore
    } else {
        QualityFlag::Ok
    }
}

/// Attach the run metadata and the quality flag, producing the final record
pub fn stamp_metadata(row: FilledRow, context: &RunContext) -> ProductRecord {
    let quality_flag = classify_quality(&row);
    ProductRecord {
        barcode: row.barcode,
        name: row.name,
        category: row.category,
        brand: row.brand,
        quantity: row.quantity,
        stores: row.stores,
        countries: row.countries,
        nutriscore: row.nutriscore,
        observed_at: row.observed_at,
        extracted_at: context.extracted_at,
        pipeline_version: context.pipeline_version.clone(),
        quality_flag,
    }
}

/// Turn a raw batch into a sealed, load-ready payload
#[instrument(skip_all, fields(run_id = %raw.context.run_id, category = %raw.context.category))]
pub fn transform(raw: RawBatch) -> Result<BatchPayload> {
    let RawBatch { context, rows, .. } = raw;
    info!(input_rows = rows.len(), "Starting transformation");

    if rows.is_empty() {
        warn!("Empty batch received, nothing to transform");
        return BatchPayload::new(context, Vec::new());
    }

    if let Some(index) = rows.iter().position(|row| barcode_of(row).is_none()) {
        return Err(EtlError::transform(format!(
            "row {} has no barcode and cannot be keyed",
            index
        )));
    }

    let before = rows.len();
    let rows = deduplicate(rows);
    info!(removed = before - rows.len(), "Removed duplicate records");

    let records = rows
        .into_iter()
        .map(|row| fill_defaults(row).map(|filled| stamp_metadata(filled, &context)))
        .collect::<Result<Vec<_>>>()?;

    let mut flags: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in &records {
        *flags.entry(record.quality_flag.as_str()).or_default() += 1;
    }
    info!(output_rows = records.len(), quality_flags = ?flags, "Transformation complete");

    BatchPayload::new(context, records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(code: &str, name: Option<&str>, grade: Option<&str>) -> RawProduct {
        RawProduct {
            code: Some(code.to_string()),
            product_name: name.map(str::to_string),
            nutriscore_grade: grade.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence() {
        let rows = vec![
            raw("1", Some("first"), Some("a")),
            raw("2", Some("other"), Some("b")),
            raw(" 1 ", Some("second"), Some("c")),
        ];

        let deduped = deduplicate(rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].product_name.as_deref(), Some("first"));
        assert_eq!(deduped[1].code.as_deref(), Some("2"));
    }

    #[test]
    fn test_fill_defaults_uses_sentinels() {
        let filled = fill_defaults(RawProduct {
            code: Some("42".to_string()),
            product_name: Some("   ".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filled.name, UNKNOWN_NAME);
        assert_eq!(filled.category, UNKNOWN_CATEGORY);
        assert_eq!(filled.brand, UNKNOWN_BRAND);
        assert_eq!(filled.stores, UNKNOWN_STORE);
        assert_eq!(filled.countries, UNKNOWN_COUNTRY);
        assert_eq!(filled.quantity, UNKNOWN_QUANTITY);
        assert!(filled.nutriscore.is_none());
        assert!(filled.observed_at.is_none());
    }

    #[test]
    fn test_fill_defaults_normalizes_text() {
        let filled = fill_defaults(RawProduct {
            code: Some("42".to_string()),
            product_name: Some("  ORANGE juice ".to_string()),
            brands: Some("tropicana".to_string()),
            quantity: Some(" 1 L ".to_string()),
            nutriscore_grade: Some(" C ".to_string()),
            last_modified_t: Some(json!("1700000000")),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filled.name, "Orange Juice");
        assert_eq!(filled.brand, "Tropicana");
        assert_eq!(filled.quantity, "1 L");
        assert_eq!(filled.nutriscore.as_deref(), Some("c"));
        assert_eq!(filled.observed_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_fill_defaults_rejects_missing_barcode() {
        let err = fill_defaults(RawProduct::default()).unwrap_err();
        assert!(matches!(err, EtlError::Transform(_)));
    }

    #[test]
    fn test_unknown_grade_is_absent() {
        assert_eq!(normalize_nutriscore(Some("unknown")), None);
        assert_eq!(normalize_nutriscore(Some("NOT_RATED")), None);
        assert_eq!(
            normalize_nutriscore(Some("not-applicable")).as_deref(),
            Some("not-applicable")
        );
    }

    #[test]
    fn test_bad_epoch_becomes_none() {
        assert!(epoch_to_datetime(&json!("yesterday")).is_none());
        assert!(epoch_to_datetime(&json!(null)).is_none());
        assert!(epoch_to_datetime(&json!(1.7e9)).is_some());
    }

    #[test]
    fn test_name_check_wins_over_nutriscore() {
        let filled = fill_defaults(raw("1", None, None)).unwrap();
        assert_eq!(classify_quality(&filled), QualityFlag::MissingName);

        let filled = fill_defaults(raw("2", Some("water"), None)).unwrap();
        assert_eq!(classify_quality(&filled), QualityFlag::MissingNutriscore);

        let filled = fill_defaults(raw("3", Some("water"), Some("a"))).unwrap();
        assert_eq!(classify_quality(&filled), QualityFlag::Ok);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let filled = fill_defaults(raw("1", Some("cola"), None)).unwrap();
        let flags: HashSet<_> = (0..10).map(|_| classify_quality(&filled)).collect();
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn test_transform_stamps_uniform_context() {
        let ctx = RunContext::new("beverages");
        let batch = RawBatch::new(
            ctx.clone(),
            vec![
                raw("1", Some("cola"), Some("e")),
                raw("2", None, Some("b")),
                raw("3", Some("water"), Some("a")),
            ],
        );

        let payload = transform(batch).unwrap();
        assert_eq!(payload.len(), 3);
        assert!(payload.verify().is_ok());
        assert!(payload
            .records
            .iter()
            .all(|r| r.extracted_at == ctx.extracted_at && r.pipeline_version == ctx.pipeline_version));

        let missing_name: Vec<_> = payload
            .records
            .iter()
            .filter(|r| r.quality_flag == QualityFlag::MissingName)
            .collect();
        assert_eq!(missing_name.len(), 1);
        assert_eq!(missing_name[0].barcode, "2");
    }

    #[test]
    fn test_transform_rejects_keyless_row() {
        let ctx = RunContext::new("beverages");
        let mut keyless = raw("", Some("mystery"), None);
        keyless.code = None;
        let batch = RawBatch::new(ctx, vec![raw("1", Some("cola"), None), keyless]);

        let err = transform(batch).unwrap_err();
        assert!(err.to_string().contains("row 1 has no barcode"));
    }

    #[test]
    fn test_transform_empty_batch() {
        let payload = transform(RawBatch::new(RunContext::new("snacks"), Vec::new())).unwrap();
        assert!(payload.is_empty());
    }
}
