//! Reuse of a document's previous extraction across runs.
//!
//! Caching is per concern: a record whose KPIs are still fresh but which has no
//! `tva_data` skips OCR and KPI extraction and only re-runs the TVA pass.

use crate::coercion::coerce_year;
use crate::ingestion::extraction_from_value;
use crate::schema::{Kpi, RawDocumentExtraction};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log::{debug, warn};
use serde_json::Value;

/// Parses the timestamp formats stores have written: RFC 3339 or naive ISO (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Whether a stored extraction can stand in for a fresh OCR + KPI pass.
///
/// A timestamp that cannot be parsed does not invalidate the record.
pub fn is_cached_valid(record: Option<&Value>, now: DateTime<Utc>, max_age: Duration) -> bool {
    let Some(object) = record.and_then(Value::as_object) else {
        return false;
    };

    if object.get("fiscal_year").and_then(coerce_year).is_none() {
        return false;
    }

    let has_kpis = object
        .get("kpis")
        .and_then(Value::as_object)
        .is_some_and(|kpis| kpis.keys().any(|label| Kpi::from_label(label).is_some()));
    if !has_kpis {
        return false;
    }

    match object.get("processing_timestamp").and_then(Value::as_str) {
        Some(raw) => match parse_timestamp(raw) {
            Some(processed_at) => {
                let age = now - processed_at;
                if age > max_age {
                    debug!("Cached extraction is {} days old, reprocessing", age.num_days());
                    false
                } else {
                    true
                }
            }
            None => {
                warn!("Unreadable processing_timestamp '{}', keeping cache", raw);
                true
            }
        },
        None => true,
    }
}

/// What the orchestrator should do with one document.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheDecision {
    /// Run OCR, KPI and TVA extraction.
    Reprocess,
    /// Everything needed is cached.
    Reuse(RawDocumentExtraction),
    /// KPIs are cached, TVA data must be extracted again.
    RefreshTva {
        extraction: RawDocumentExtraction,
        markdown: Option<String>,
    },
}

impl CacheDecision {
    pub fn evaluate(
        record: Option<&Value>,
        document_name: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Self {
        if !is_cached_valid(record, now, max_age) {
            return Self::Reprocess;
        }
        let Some(record) = record else {
            return Self::Reprocess;
        };

        let extraction = match extraction_from_value(record, document_name) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Cached record for '{}' unusable: {}", document_name, e);
                return Self::Reprocess;
            }
        };

        if extraction.tva_data.is_some() {
            Self::Reuse(extraction)
        } else {
            let markdown = record
                .get("markdown")
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string);
            Self::RefreshTva {
                extraction,
                markdown,
            }
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        !matches!(self, Self::Reprocess)
    }
}
