//! VAT reconciliation from table B14 figures.

use crate::coercion::coerce;
use crate::schema::TvaRawData;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Statutory rate divisor: a 20% VAT-inclusive amount divided by 6 gives its VAT.
const TVA_DIVISOR: f64 = 6.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TvaAnalysis {
    pub chiffre_affaires: Option<f64>,
    pub tva_facturee: Option<f64>,
    pub tva_pratique: Option<f64>,
    pub clients_exercice_precedent: Option<f64>,
    pub clients_exercice_brut: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encaissement_theorique: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva_theorique: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecart_tva: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecart_tva_pourcentage: Option<f64>,
}

impl TvaAnalysis {
    pub fn is_reconciled(&self) -> bool {
        self.encaissement_theorique.is_some()
    }
}

/// Coerces the raw inputs and derives theoretical collections and the VAT gap.
///
/// Missing operands are never replaced by zero here: if any of the four
/// collection inputs is absent the derived fields stay `None`.
pub fn reconcile(raw: &TvaRawData) -> TvaAnalysis {
    let mut analysis = TvaAnalysis {
        chiffre_affaires: coerce(&raw.chiffre_affaires),
        tva_facturee: coerce(&raw.tva_facturee),
        tva_pratique: coerce(&raw.tva_pratique),
        clients_exercice_precedent: coerce(&raw.clients_exercice_precedent),
        clients_exercice_brut: coerce(&raw.clients_exercice_brut),
        ..TvaAnalysis::default()
    };

    let (Some(ca), Some(facturee), Some(precedent), Some(brut)) = (
        analysis.chiffre_affaires,
        analysis.tva_facturee,
        analysis.clients_exercice_precedent,
        analysis.clients_exercice_brut,
    ) else {
        debug!("TVA inputs incomplete, skipping reconciliation");
        return analysis;
    };

    let encaissement = ca + facturee + precedent - brut;
    let theorique = encaissement / TVA_DIVISOR;
    analysis.encaissement_theorique = Some(encaissement);
    analysis.tva_theorique = Some(theorique);

    if let Some(pratique) = analysis.tva_pratique {
        let ecart = theorique - pratique;
        analysis.ecart_tva = Some(ecart);
        analysis.ecart_tva_pourcentage = Some(if theorique != 0.0 {
            ecart / theorique * 100.0
        } else {
            0.0
        });
    }

    analysis
}

/// Like [`reconcile`], for an untyped `tva_data` blob. Non-objects yield `None`.
pub fn reconcile_value(raw: &Value) -> Option<TvaAnalysis> {
    if !raw.is_object() {
        return None;
    }
    let data: TvaRawData = serde_json::from_value(raw.clone()).ok()?;
    Some(reconcile(&data))
}

pub fn analysis_key(fiscal_year: Option<i32>) -> String {
    match fiscal_year {
        Some(year) => format!("tva_analysis_{}", year),
        None => "tva_analysis_unknown".to_string(),
    }
}

/// Per-year TVA results, serialized as `{"tva_analysis_2023": {...}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TvaAnalysisSet(BTreeMap<String, TvaAnalysis>);

impl TvaAnalysisSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles and stores one document's figures. Empty inputs are ignored.
    pub fn add(&mut self, fiscal_year: Option<i32>, raw: &TvaRawData) -> Option<&TvaAnalysis> {
        if raw.is_empty() {
            return None;
        }
        let key = analysis_key(fiscal_year);
        let analysis = reconcile(raw);
        if let Some(ecart) = analysis.ecart_tva_pourcentage {
            info!("{}: ecart TVA {:.2}%", key, ecart);
        }
        self.0.insert(key.clone(), analysis);
        self.0.get(&key)
    }

    pub fn get(&self, fiscal_year: Option<i32>) -> Option<&TvaAnalysis> {
        self.0.get(&analysis_key(fiscal_year))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TvaAnalysis)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
