use crate::coercion::coerce_year;
use crate::error::{LiasseError, Result};
use crate::schema::{Kpi, RawDocumentExtraction, RawYearPair, TvaRawData};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn invalid(document: &str, details: impl Into<String>) -> LiasseError {
    LiasseError::InvalidExtraction {
        document: document.to_string(),
        details: details.into(),
    }
}

/// Converts a KPI payload (model response or cached record) into a typed extraction.
///
/// The payload must be an object with a usable `fiscal_year` and a `kpis`
/// object holding at least one recognised label. Labels are resolved
/// leniently; unknown ones are dropped.
/// A bare scalar in place of a `{"N", "N-1"}` pair is read as the `N` value.
pub fn extraction_from_value(value: &Value, document_name: &str) -> Result<RawDocumentExtraction> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid(document_name, "payload is not an object"))?;

    let fiscal_year = object
        .get("fiscal_year")
        .and_then(coerce_year)
        .ok_or_else(|| invalid(document_name, "missing fiscal_year"))?;

    let raw_kpis = object
        .get("kpis")
        .and_then(Value::as_object)
        .filter(|kpis| !kpis.is_empty())
        .ok_or_else(|| invalid(document_name, "missing kpis"))?;

    let name = object
        .get("document_name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(document_name);

    let kpis = kpis_from_map(raw_kpis);
    if kpis.is_empty() {
        return Err(invalid(document_name, "no recognised KPI labels"));
    }

    let mut extraction = RawDocumentExtraction::new(name, fiscal_year);
    extraction.kpis = kpis;
    extraction.tva_data = object.get("tva_data").and_then(tva_from_value);

    debug!(
        "Document '{}' (fiscal year {}): {} KPI entries",
        extraction.document_name,
        fiscal_year,
        extraction.kpis.len()
    );
    Ok(extraction)
}

fn kpis_from_map(raw: &Map<String, Value>) -> BTreeMap<Kpi, RawYearPair> {
    let mut kpis = BTreeMap::new();
    for (label, entry) in raw {
        let Some(kpi) = Kpi::from_label(label) else {
            debug!("Ignoring unknown KPI label '{}'", label);
            continue;
        };
        let pair = match entry {
            Value::Object(columns) => RawYearPair {
                current: columns.get("N").cloned().unwrap_or(Value::Null),
                previous: columns.get("N-1").cloned().unwrap_or(Value::Null),
            },
            scalar => RawYearPair {
                current: scalar.clone(),
                previous: Value::Null,
            },
        };
        kpis.insert(kpi, pair);
    }
    kpis
}

/// Reads a `tva_data` object. Returns `None` for non-objects and all-null blocks.
pub fn tva_from_value(value: &Value) -> Option<TvaRawData> {
    if !value.is_object() {
        return None;
    }
    match serde_json::from_value::<TvaRawData>(value.clone()) {
        Ok(tva) if !tva.is_empty() => Some(tva),
        Ok(_) => None,
        Err(e) => {
            warn!("Discarding malformed tva_data: {}", e);
            None
        }
    }
}

/// Keeps the extractions that can take part in a merge, logging the rest.
pub fn validate_extractions(
    payloads: &[(String, Value)],
) -> (Vec<RawDocumentExtraction>, Vec<LiasseError>) {
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for (document_name, payload) in payloads {
        match extraction_from_value(payload, document_name) {
            Ok(extraction) => valid.push(extraction),
            Err(e) => {
                warn!("Skipping document '{}': {}", document_name, e);
                rejected.push(e);
            }
        }
    }
    (valid, rejected)
}

/// Builds the `extracted_data` record persisted on a document after a run.
pub fn document_record(
    extraction: &RawDocumentExtraction,
    markdown: Option<&str>,
    processed_at: DateTime<Utc>,
) -> Value {
    let mut record = json!({
        "fiscal_year": extraction.fiscal_year,
        "document_name": extraction.document_name,
        "kpis": extraction.kpis,
        "processing_timestamp": processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "extracted_from_multi_doc_processing": true,
    });
    if let Some(tva) = &extraction.tva_data {
        record["tva_data"] = json!(tva);
    }
    if let Some(markdown) = markdown {
        record["markdown"] = Value::String(markdown.to_string());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parses_model_payload() {
        let payload = json!({
            "fiscal_year": "2023",
            "kpis": {
                "Chiffre d'affaires": {"N": "1 200", "N-1": 1000},
                "resultat_net": 80,
                "Redevances restant à payer (a plus d'un an)": {"N": 30, "N-1": null},
                "Something else": {"N": 1}
            },
            "tva_data": {"chiffre_affaires": 1200, "tva_facturee": null}
        });

        let extraction = extraction_from_value(&payload, "liasse_2023.pdf").unwrap();
        assert_eq!(extraction.fiscal_year, 2023);
        assert_eq!(extraction.document_name, "liasse_2023.pdf");
        assert_eq!(extraction.kpis.len(), 3);
        assert_eq!(
            extraction.kpis[&Kpi::ChiffreAffaires].current,
            json!("1 200")
        );
        assert_eq!(extraction.kpis[&Kpi::ResultatNet].current, json!(80));
        assert_eq!(extraction.kpis[&Kpi::ResultatNet].previous, Value::Null);
        assert!(extraction.kpis.contains_key(&Kpi::RedevancesPlusUnAn));
        assert!(extraction.tva_data.is_some());
    }

    #[test]
    fn test_rejects_incomplete_payloads() {
        assert!(extraction_from_value(&json!([1, 2]), "a.pdf").is_err());
        assert!(extraction_from_value(&json!({"kpis": {"Résultat net": 1}}), "a.pdf").is_err());
        assert!(extraction_from_value(&json!({"fiscal_year": null, "kpis": {}}), "a.pdf").is_err());
        assert!(extraction_from_value(&json!({"fiscal_year": 2023, "kpis": {}}), "a.pdf").is_err());

        let err = extraction_from_value(&json!({"fiscal_year": 2023}), "a.pdf").unwrap_err();
        assert!(matches!(err, LiasseError::InvalidExtraction { .. }));
    }

    #[test]
    fn test_rejects_unrecognised_labels_only() {
        let payload = json!({
            "fiscal_year": 2023,
            "kpis": {"Total bilan": {"N": 10}, "Effectif": 12}
        });
        let err = extraction_from_value(&payload, "a.pdf").unwrap_err();
        assert!(matches!(err, LiasseError::InvalidExtraction { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_fiscal_years() {
        for year in [json!(-2147483648i64), json!(2147483647), json!(0), json!("20233")] {
            let payload = json!({
                "fiscal_year": year,
                "kpis": {"Chiffre d'affaires": {"N": 10, "N-1": 5}}
            });
            assert!(extraction_from_value(&payload, "a.pdf").is_err(), "{}", year);
        }
    }

    #[test]
    fn test_empty_tva_block_is_absent() {
        assert!(tva_from_value(&json!({"tva_facturee": null})).is_none());
        assert!(tva_from_value(&json!("x")).is_none());
    }

    #[test]
    fn test_validate_extractions_skips_invalid() {
        let payloads = vec![
            ("good.pdf".to_string(), json!({"fiscal_year": 2022, "kpis": {"Résultat net": 5}})),
            ("bad.pdf".to_string(), json!({"error": "no json"})),
        ];
        let (valid, rejected) = validate_extractions(&payloads);
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_document_record_round_trips() {
        let extraction = RawDocumentExtraction::new("a.pdf", 2023).with_kpi(
            Kpi::ChiffreAffaires,
            json!(10),
            json!(8),
        );
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = document_record(&extraction, Some("# Bilan"), at);

        assert_eq!(record["processing_timestamp"], "2024-03-01T12:00:00Z");
        assert_eq!(record["extracted_from_multi_doc_processing"], true);
        assert_eq!(record["markdown"], "# Bilan");
        assert!(record.get("tva_data").is_none());

        let back = extraction_from_value(&record, "ignored.pdf").unwrap();
        assert_eq!(back, extraction);
    }
}
