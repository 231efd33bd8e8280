//! Combines per-document KPI extractions into one multi-year timeline.

use crate::coercion::coerce;
use crate::schema::{Kpi, RawDocumentExtraction};
use crate::timeline::{FiscalYearMapping, YearLabel};
use crate::utils::sort_year_labels;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// What happens when two documents supply different values for the same KPI and year label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The document merged later (older fiscal year) overwrites.
    #[default]
    LastWriteWins,
    /// The first value written (most recent filing) is kept.
    FirstWriteWins,
}

impl ConflictPolicy {
    /// Returns `(kept, discarded)` for an existing and an incoming value.
    pub fn resolve(self, existing: f64, incoming: f64) -> (f64, f64) {
        match self {
            ConflictPolicy::LastWriteWins => (incoming, existing),
            ConflictPolicy::FirstWriteWins => (existing, incoming),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeConflict {
    pub kpi: Kpi,
    pub label: YearLabel,
    pub kept: f64,
    pub discarded: f64,
    /// Document whose value arrived second.
    pub document: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeMetadata {
    pub total_documents: usize,
    pub fiscal_years: Vec<i32>,
    pub year_mapping: FiscalYearMapping,
    pub available_years: Vec<YearLabel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<MergeConflict>,
}

/// KPI → year label → value, for every year some document supplied a usable figure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergedKpiSet {
    #[serde(flatten)]
    values: BTreeMap<Kpi, BTreeMap<YearLabel, f64>>,
    #[serde(rename = "_metadata", default)]
    metadata: MergeMetadata,
}

impl MergedKpiSet {
    /// An empty set with the canonical KPIs pre-initialised.
    pub fn new() -> Self {
        let values = Kpi::CANONICAL
            .iter()
            .map(|kpi| (*kpi, BTreeMap::new()))
            .collect();
        Self {
            values,
            metadata: MergeMetadata::default(),
        }
    }

    pub fn get(&self, kpi: Kpi, label: YearLabel) -> Option<f64> {
        self.values.get(&kpi).and_then(|series| series.get(&label)).copied()
    }

    pub fn series(&self, kpi: Kpi) -> Option<&BTreeMap<YearLabel, f64>> {
        self.values.get(&kpi)
    }

    pub fn kpis(&self) -> impl Iterator<Item = Kpi> + '_ {
        self.values.keys().copied()
    }

    pub fn insert(&mut self, kpi: Kpi, label: YearLabel, value: f64) {
        self.values.entry(kpi).or_default().insert(label, value);
    }

    pub fn metadata(&self) -> &MergeMetadata {
        &self.metadata
    }

    pub fn available_years(&self) -> &[YearLabel] {
        &self.metadata.available_years
    }

    pub fn set_available_years(&mut self, mut labels: Vec<YearLabel>) {
        sort_year_labels(&mut labels);
        self.metadata.available_years = labels;
    }

    pub fn value_count(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }
}

/// Merges extractions with a timeline built from their own fiscal years.
pub fn merge_documents(
    extractions: &[RawDocumentExtraction],
    policy: ConflictPolicy,
) -> MergedKpiSet {
    let years: BTreeSet<i32> = extractions.iter().map(|e| e.fiscal_year).collect();
    let mapping = FiscalYearMapping::build(&years);
    merge_extractions(extractions, &mapping, policy)
}

/// Writes every usable `N` / `N-1` figure of every extraction into the label the
/// mapping assigns to its absolute year.
///
/// Extractions are visited most recent first; ties keep their input order.
/// Only non-null, numeric, non-zero values are written.
pub fn merge_extractions(
    extractions: &[RawDocumentExtraction],
    mapping: &FiscalYearMapping,
    policy: ConflictPolicy,
) -> MergedKpiSet {
    let mut merged = MergedKpiSet::new();

    let mut ordered: Vec<&RawDocumentExtraction> = extractions.iter().collect();
    ordered.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));

    for extraction in &ordered {
        let year = extraction.fiscal_year;
        for (kpi, pair) in &extraction.kpis {
            if let Some(label) = mapping.label_for(year) {
                write_value(&mut merged, *kpi, label, &pair.current, extraction, policy);
            }
            if let Some(label) = year.checked_sub(1).and_then(|y| mapping.label_for(y)) {
                write_value(&mut merged, *kpi, label, &pair.previous, extraction, policy);
            }
        }
    }

    let document_years: BTreeSet<i32> = ordered.iter().map(|e| e.fiscal_year).collect();
    let available: Vec<YearLabel> = mapping
        .iter()
        .filter(|(year, _)| {
            document_years.contains(year)
                || year
                    .checked_add(1)
                    .is_some_and(|next| document_years.contains(&next))
        })
        .map(|(_, label)| label)
        .collect();

    merged.metadata.total_documents = extractions.len();
    merged.metadata.fiscal_years = ordered.iter().map(|e| e.fiscal_year).collect();
    merged.metadata.year_mapping = mapping.clone();
    merged.set_available_years(available);

    info!(
        "Merged {} documents into {} values across years {:?}",
        extractions.len(),
        merged.value_count(),
        merged
            .available_years()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    );
    if !merged.metadata.conflicts.is_empty() {
        warn!(
            "{} conflicting KPI values resolved with {:?}",
            merged.metadata.conflicts.len(),
            policy
        );
    }

    merged
}

fn write_value(
    merged: &mut MergedKpiSet,
    kpi: Kpi,
    label: YearLabel,
    raw: &Value,
    extraction: &RawDocumentExtraction,
    policy: ConflictPolicy,
) {
    let Some(incoming) = coerce(raw).filter(|v| *v != 0.0) else {
        return;
    };

    let series = merged.values.entry(kpi).or_default();
    match series.get(&label).copied() {
        None => {
            series.insert(label, incoming);
        }
        Some(existing) if existing == incoming => {}
        Some(existing) => {
            let (kept, discarded) = policy.resolve(existing, incoming);
            series.insert(label, kept);
            debug!(
                "{} [{}]: kept {} over {} ({})",
                kpi, label, kept, discarded, extraction.document_name
            );
            merged.metadata.conflicts.push(MergeConflict {
                kpi,
                label,
                kept,
                discarded,
                document: extraction.document_name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn label(offset: u32) -> YearLabel {
        YearLabel::new(offset)
    }

    #[test]
    fn test_canonical_kpis_preinitialised() {
        let merged = merge_documents(&[], ConflictPolicy::default());
        for kpi in Kpi::CANONICAL {
            assert!(merged.series(kpi).is_some_and(|s| s.is_empty()), "{}", kpi);
        }
        assert!(merged.series(Kpi::TresorerieNette).is_none());
        assert!(merged.available_years().is_empty());
        assert_eq!(merged.metadata().total_documents, 0);
    }

    #[test]
    fn test_single_document_fills_n_and_n1() {
        let doc = RawDocumentExtraction::new("a.pdf", 2023)
            .with_kpi(Kpi::ChiffreAffaires, json!("1 000"), json!(800))
            .with_kpi(Kpi::TresorerieNette, json!(50), json!(null));
        let merged = merge_documents(&[doc], ConflictPolicy::default());

        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(0)), Some(1000.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(1)), Some(800.0));
        assert_eq!(merged.get(Kpi::TresorerieNette, label(0)), Some(50.0));
        assert_eq!(merged.get(Kpi::TresorerieNette, label(1)), None);
        assert_eq!(merged.available_years(), &[label(0), label(1)]);
    }

    #[test]
    fn test_null_zero_and_garbage_are_not_written() {
        let doc = RawDocumentExtraction::new("a.pdf", 2023)
            .with_kpi(Kpi::ResultatNet, json!(0), json!("n/a"))
            .with_kpi(Kpi::CapitauxPropres, json!(null), json!("0,0"));
        let merged = merge_documents(&[doc], ConflictPolicy::default());
        assert!(merged.series(Kpi::ResultatNet).unwrap().is_empty());
        assert!(merged.series(Kpi::CapitauxPropres).unwrap().is_empty());
    }

    #[test]
    fn test_last_write_wins_on_shared_label() {
        // 2023's N-1 column and 2022's N column both describe 2022 (label N-1).
        let newer = RawDocumentExtraction::new("2023.pdf", 2023)
            .with_kpi(Kpi::ChiffreAffaires, json!(1200), json!(1000));
        let older = RawDocumentExtraction::new("2022.pdf", 2022)
            .with_kpi(Kpi::ChiffreAffaires, json!(1050), json!(900));

        let merged = merge_documents(&[older.clone(), newer.clone()], ConflictPolicy::LastWriteWins);
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(1)), Some(1050.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(2)), Some(900.0));
        assert_eq!(
            merged.metadata().conflicts,
            vec![MergeConflict {
                kpi: Kpi::ChiffreAffaires,
                label: label(1),
                kept: 1050.0,
                discarded: 1000.0,
                document: "2022.pdf".to_string(),
            }]
        );

        let merged = merge_documents(&[older, newer], ConflictPolicy::FirstWriteWins);
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(1)), Some(1000.0));
    }

    #[test]
    fn test_same_year_documents_follow_input_order() {
        let first = RawDocumentExtraction::new("v1.pdf", 2023)
            .with_kpi(Kpi::ResultatNet, json!(10), json!(null));
        let second = RawDocumentExtraction::new("v2.pdf", 2023)
            .with_kpi(Kpi::ResultatNet, json!(20), json!(null));
        let merged = merge_documents(&[first, second], ConflictPolicy::LastWriteWins);
        assert_eq!(merged.get(Kpi::ResultatNet, label(0)), Some(20.0));
    }

    #[test]
    fn test_non_consecutive_available_years() {
        let a = RawDocumentExtraction::new("2023.pdf", 2023)
            .with_kpi(Kpi::ChiffreAffaires, json!(300), json!(200));
        let b = RawDocumentExtraction::new("2021.pdf", 2021)
            .with_kpi(Kpi::ChiffreAffaires, json!(150), json!(100));
        let merged = merge_documents(&[b, a], ConflictPolicy::default());

        assert_eq!(
            merged.available_years(),
            &[label(0), label(1), label(2), label(3)]
        );
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(0)), Some(300.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(1)), Some(200.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(2)), Some(150.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(3)), Some(100.0));
        assert_eq!(merged.metadata().fiscal_years, vec![2023, 2021]);
    }

    #[test]
    fn test_serialized_shape() {
        let doc = RawDocumentExtraction::new("a.pdf", 2023)
            .with_kpi(Kpi::ChiffreAffaires, json!(10), json!(5));
        let merged = merge_documents(&[doc], ConflictPolicy::default());
        let value = serde_json::to_value(&merged).unwrap();

        assert_eq!(value["Chiffre d'affaires"]["N"], json!(10.0));
        assert_eq!(value["Chiffre d'affaires"]["N-1"], json!(5.0));
        assert_eq!(value["Capitaux propres"], json!({}));
        assert_eq!(value["_metadata"]["available_years"], json!(["N", "N-1"]));
        assert_eq!(value["_metadata"]["total_documents"], json!(1));

        let back: MergedKpiSet = serde_json::from_value(value).unwrap();
        assert_eq!(back, merged);
    }

    #[test]
    fn test_extreme_years_merge_without_overflow() {
        let docs = [
            RawDocumentExtraction::new("max.pdf", i32::MAX)
                .with_kpi(Kpi::ChiffreAffaires, json!(10), json!(5)),
            RawDocumentExtraction::new("min.pdf", i32::MIN)
                .with_kpi(Kpi::ChiffreAffaires, json!(7), json!(3)),
        ];
        let merged = merge_documents(&docs, ConflictPolicy::default());

        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(0)), Some(10.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(1)), Some(5.0));
        assert_eq!(merged.get(Kpi::ChiffreAffaires, label(2)), Some(7.0));
        assert_eq!(merged.available_years(), &[label(0), label(1), label(2)]);
    }
}
