//! Derived financial ratios computed from a merged KPI timeline.
//!
//! Every ratio is evaluated independently for each available year. A ratio whose
//! inputs are missing for a year is left out of the result instead of being set
//! to zero; only EBITDA, the outstanding lease commitment and net debt treat
//! missing additive terms as zero.

use crate::merge::MergedKpiSet;
use crate::schema::Kpi;
use crate::timeline::{FiscalYearMapping, YearLabel};
use crate::utils::{adjacent_pairs, sort_year_labels};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ratio {
    Ebitda,
    EncoursCreditBail,
    DetteNette,
    MargeEbitda,
    MargeExploitation,
    MargeNette,
    Roe,
    Roce,
    Gearing,
    CapaciteRemboursements,
    TresorerieNette,
}

impl Ratio {
    pub const ALL: [Ratio; 11] = [
        Ratio::Ebitda,
        Ratio::EncoursCreditBail,
        Ratio::DetteNette,
        Ratio::MargeEbitda,
        Ratio::MargeExploitation,
        Ratio::MargeNette,
        Ratio::Roe,
        Ratio::Roce,
        Ratio::Gearing,
        Ratio::CapaciteRemboursements,
        Ratio::TresorerieNette,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Ratio::Ebitda => "ebitda",
            Ratio::EncoursCreditBail => "encours_credit_bail",
            Ratio::DetteNette => "dette_nette",
            Ratio::MargeEbitda => "marge_ebitda",
            Ratio::MargeExploitation => "marge_exploitation",
            Ratio::MargeNette => "marge_nette",
            Ratio::Roe => "roe",
            Ratio::Roce => "roce",
            Ratio::Gearing => "gearing",
            Ratio::CapaciteRemboursements => "capacite_remboursements",
            Ratio::TresorerieNette => "tresorerie_nette",
        }
    }

    pub fn key(self, label: YearLabel) -> String {
        format!("{}_{}", self.name(), label.suffix())
    }
}

/// Provenance carried over from the merge step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MultiDocumentInfo {
    pub total_documents: usize,
    pub fiscal_years: Vec<i32>,
    pub year_mapping: FiscalYearMapping,
    pub is_multi_document: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RatioMetadata {
    pub available_years: Vec<YearLabel>,
    pub processed_years: Vec<String>,
    pub total_years: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_document: Option<MultiDocumentInfo>,
}

/// Flat `ratio_suffix → value` map, serialized alongside a `_metadata` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComputedRatioSet {
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
    #[serde(rename = "_metadata", default)]
    metadata: RatioMetadata,
}

impl ComputedRatioSet {
    pub fn get(&self, ratio: Ratio, label: YearLabel) -> Option<f64> {
        self.values.get(&ratio.key(label)).copied()
    }

    pub fn get_key(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn variation(&self, current: YearLabel, previous: YearLabel) -> Option<f64> {
        self.values.get(&variation_key(current, previous)).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn metadata(&self) -> &RatioMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, ratio: Ratio, label: YearLabel, value: f64) {
        self.values.insert(ratio.key(label), value);
    }
}

pub fn variation_key(current: YearLabel, previous: YearLabel) -> String {
    format!(
        "variation_chiffre_affaires_{}_vs_{}",
        current.suffix(),
        previous.suffix()
    )
}

fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

fn percent(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let numerator = numerator?;
    let denominator = non_zero(denominator)?;
    Some(numerator / denominator * 100.0)
}

pub struct RatioEngine<'a> {
    kpis: &'a MergedKpiSet,
}

impl<'a> RatioEngine<'a> {
    pub fn new(kpis: &'a MergedKpiSet) -> Self {
        Self { kpis }
    }

    fn kpi(&self, kpi: Kpi, label: YearLabel) -> Option<f64> {
        self.kpis.get(kpi, label)
    }

    fn kpi_or_zero(&self, kpi: Kpi, label: YearLabel) -> f64 {
        self.kpi(kpi, label).unwrap_or(0.0)
    }

    pub fn compute(&self) -> ComputedRatioSet {
        let mut years = self.kpis.available_years().to_vec();
        sort_year_labels(&mut years);

        let mut ratios = ComputedRatioSet::default();
        let source = self.kpis.metadata();

        ratios.metadata = RatioMetadata {
            available_years: years.clone(),
            processed_years: years.iter().map(|y| y.suffix()).collect(),
            total_years: years.len(),
            multi_document: (source.total_documents > 0).then(|| MultiDocumentInfo {
                total_documents: source.total_documents,
                fiscal_years: source.fiscal_years.clone(),
                year_mapping: source.year_mapping.clone(),
                is_multi_document: source.total_documents > 1,
            }),
        };

        debug!(
            "Computing ratios for years {:?}",
            ratios.metadata.processed_years
        );

        for &year in &years {
            self.compute_year(year, &mut ratios);
        }

        for (current, previous) in adjacent_pairs(&years) {
            let ca_current = self.kpi(Kpi::ChiffreAffaires, current);
            let ca_previous = non_zero(self.kpi(Kpi::ChiffreAffaires, previous));
            if let (Some(a), Some(b)) = (ca_current, ca_previous) {
                ratios
                    .values
                    .insert(variation_key(current, previous), (a / b - 1.0) * 100.0);
            }
        }

        info!(
            "Computed {} ratios over {} years",
            ratios.len(),
            ratios.metadata.total_years
        );
        ratios
    }

    fn compute_year(&self, year: YearLabel, ratios: &mut ComputedRatioSet) {
        let chiffre_affaires = self.kpi(Kpi::ChiffreAffaires, year);
        let resultat_exploitation = self.kpi(Kpi::ResultatExploitation, year);
        let resultat_net = self.kpi(Kpi::ResultatNet, year);
        let capitaux_propres = self.kpi(Kpi::CapitauxPropres, year);

        let ebitda_terms = [
            self.kpi(Kpi::ResultatExploitation, year),
            self.kpi(Kpi::DotationsExploitation, year),
            self.kpi(Kpi::ReprisesExploitation, year),
            self.kpi(Kpi::RedevancesCreditBail, year),
        ];
        let ebitda = ebitda_terms
            .iter()
            .any(|term| non_zero(*term).is_some())
            .then(|| {
                self.kpi_or_zero(Kpi::ResultatExploitation, year)
                    + self.kpi_or_zero(Kpi::DotationsExploitation, year)
                    - self.kpi_or_zero(Kpi::ReprisesExploitation, year)
                    + self.kpi_or_zero(Kpi::RedevancesCreditBail, year)
            });
        if let Some(value) = ebitda {
            ratios.set(Ratio::Ebitda, year, value);
        }

        let encours_credit_bail = self.kpi_or_zero(Kpi::RedevancesMoinsUnAn, year)
            + self.kpi_or_zero(Kpi::RedevancesPlusUnAn, year)
            + self.kpi_or_zero(Kpi::PrixAchatResiduel, year);
        ratios.set(Ratio::EncoursCreditBail, year, encours_credit_bail);

        let dette_nette = self.kpi_or_zero(Kpi::DettesFinancement, year)
            + self.kpi_or_zero(Kpi::TresoreriePassif, year)
            + self.kpi_or_zero(Kpi::ComptesAssociesPassif, year)
            + encours_credit_bail
            - self.kpi_or_zero(Kpi::TresorerieActif, year)
            - self.kpi_or_zero(Kpi::TitresValeursPlacement, year)
            - self.kpi_or_zero(Kpi::ComptesAssociesActif, year);
        ratios.set(Ratio::DetteNette, year, dette_nette);
        let dette_nette = ratios.get(Ratio::DetteNette, year);

        if let Some(value) = percent(ebitda, chiffre_affaires) {
            ratios.set(Ratio::MargeEbitda, year, value);
        }
        if let Some(value) = percent(resultat_exploitation, chiffre_affaires) {
            ratios.set(Ratio::MargeExploitation, year, value);
        }
        if let Some(value) = percent(resultat_net, chiffre_affaires) {
            ratios.set(Ratio::MargeNette, year, value);
        }
        if let Some(value) = percent(resultat_net, capitaux_propres) {
            ratios.set(Ratio::Roe, year, value);
        }

        let capital_employe = capitaux_propres.zip(dette_nette).map(|(cp, dn)| cp + dn);
        if let Some(value) = percent(resultat_exploitation, capital_employe) {
            ratios.set(Ratio::Roce, year, value);
        }

        if let Some(value) = percent(dette_nette, capitaux_propres) {
            ratios.set(Ratio::Gearing, year, value);
        }

        if let (Some(dn), Some(e)) = (dette_nette, non_zero(ebitda)) {
            ratios.set(Ratio::CapaciteRemboursements, year, dn / e);
        }

        let tresorerie_nette = self.kpi(Kpi::TresorerieNette, year).or_else(|| {
            let actif = self.kpi(Kpi::TresorerieActif, year);
            let passif = self.kpi(Kpi::TresoreriePassif, year);
            (actif.is_some() || passif.is_some())
                .then(|| actif.unwrap_or(0.0) - passif.unwrap_or(0.0))
        });
        if let Some(value) = tresorerie_nette {
            ratios.set(Ratio::TresorerieNette, year, value);
        }
    }
}

/// Computes every ratio for every available year of `kpis`.
pub fn compute_ratios(kpis: &MergedKpiSet) -> ComputedRatioSet {
    RatioEngine::new(kpis).compute()
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: YearLabel = YearLabel::N;
    const N1: YearLabel = YearLabel::new(1);

    fn kpis(values: &[(Kpi, YearLabel, f64)]) -> MergedKpiSet {
        let mut set = MergedKpiSet::new();
        for (kpi, label, value) in values {
            set.insert(*kpi, *label, *value);
        }
        set.set_available_years(vec![N, N1]);
        set
    }

    fn approx(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap_or_else(|| panic!("expected {}, got None", expected));
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_ebitda_zero_substitution() {
        let ratios = compute_ratios(&kpis(&[(Kpi::ResultatExploitation, N, 100.0)]));
        approx(ratios.get(Ratio::Ebitda, N), 100.0);
    }

    #[test]
    fn test_ebitda_full_formula() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ResultatExploitation, N, 100.0),
            (Kpi::DotationsExploitation, N, 40.0),
            (Kpi::ReprisesExploitation, N, 15.0),
            (Kpi::RedevancesCreditBail, N, 5.0),
        ]));
        approx(ratios.get(Ratio::Ebitda, N), 130.0);
    }

    #[test]
    fn test_ebitda_omitted_without_operands() {
        let ratios = compute_ratios(&kpis(&[(Kpi::ChiffreAffaires, N, 1000.0)]));
        assert_eq!(ratios.get(Ratio::Ebitda, N), None);
        assert_eq!(ratios.get(Ratio::MargeEbitda, N), None);
        assert_eq!(ratios.get(Ratio::CapaciteRemboursements, N), None);
    }

    #[test]
    fn test_encours_and_dette_nette_always_emitted() {
        let ratios = compute_ratios(&kpis(&[]));
        for year in [N, N1] {
            assert_eq!(ratios.get(Ratio::EncoursCreditBail, year), Some(0.0));
            assert_eq!(ratios.get(Ratio::DetteNette, year), Some(0.0));
        }
    }

    #[test]
    fn test_dette_nette_components() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::DettesFinancement, N, 500.0),
            (Kpi::TresoreriePassif, N, 50.0),
            (Kpi::ComptesAssociesPassif, N, 30.0),
            (Kpi::RedevancesMoinsUnAn, N, 10.0),
            (Kpi::RedevancesPlusUnAn, N, 20.0),
            (Kpi::PrixAchatResiduel, N, 5.0),
            (Kpi::TresorerieActif, N, 120.0),
            (Kpi::TitresValeursPlacement, N, 15.0),
            (Kpi::ComptesAssociesActif, N, 25.0),
        ]));
        approx(ratios.get(Ratio::EncoursCreditBail, N), 35.0);
        approx(ratios.get(Ratio::DetteNette, N), 500.0 + 50.0 + 30.0 + 35.0 - 120.0 - 15.0 - 25.0);
    }

    #[test]
    fn test_margins() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ChiffreAffaires, N, 1000.0),
            (Kpi::ResultatExploitation, N, 150.0),
            (Kpi::ResultatNet, N, 80.0),
            (Kpi::DotationsExploitation, N, 50.0),
        ]));
        approx(ratios.get(Ratio::MargeEbitda, N), 20.0);
        approx(ratios.get(Ratio::MargeExploitation, N), 15.0);
        approx(ratios.get(Ratio::MargeNette, N), 8.0);
    }

    #[test]
    fn test_roe_guarded_against_zero_equity() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ResultatNet, N, 80.0),
            (Kpi::CapitauxPropres, N, 0.0),
        ]));
        assert_eq!(ratios.get(Ratio::Roe, N), None);
        assert_eq!(ratios.get(Ratio::Gearing, N), None);
    }

    #[test]
    fn test_roe_and_roce() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ResultatNet, N, 50.0),
            (Kpi::ResultatExploitation, N, 90.0),
            (Kpi::CapitauxPropres, N, 400.0),
            (Kpi::DettesFinancement, N, 200.0),
        ]));
        approx(ratios.get(Ratio::Roe, N), 12.5);
        approx(ratios.get(Ratio::Roce, N), 15.0);
    }

    #[test]
    fn test_roce_omitted_when_capital_employed_is_zero() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ResultatExploitation, N, 90.0),
            (Kpi::CapitauxPropres, N, 100.0),
            (Kpi::TresorerieActif, N, 100.0),
        ]));
        assert_eq!(ratios.get(Ratio::Roce, N), None);
    }

    #[test]
    fn test_gearing_sign() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::TresorerieActif, N, 50.0),
            (Kpi::CapitauxPropres, N, 100.0),
        ]));
        approx(ratios.get(Ratio::DetteNette, N), -50.0);
        approx(ratios.get(Ratio::Gearing, N), -50.0);
    }

    #[test]
    fn test_capacite_remboursements_is_a_multiple() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::ResultatExploitation, N, 100.0),
            (Kpi::DettesFinancement, N, 350.0),
        ]));
        approx(ratios.get(Ratio::CapaciteRemboursements, N), 3.5);
    }

    #[test]
    fn test_tresorerie_nette_prefers_extracted_value() {
        let ratios = compute_ratios(&kpis(&[
            (Kpi::TresorerieNette, N, 42.0),
            (Kpi::TresorerieActif, N, 100.0),
            (Kpi::TresoreriePassif, N, 30.0),
            (Kpi::TresoreriePassif, N1, 30.0),
        ]));
        approx(ratios.get(Ratio::TresorerieNette, N), 42.0);
        approx(ratios.get(Ratio::TresorerieNette, N1), -30.0);
    }

    #[test]
    fn test_tresorerie_nette_omitted_without_operands() {
        let ratios = compute_ratios(&kpis(&[(Kpi::ChiffreAffaires, N, 10.0)]));
        assert_eq!(ratios.get(Ratio::TresorerieNette, N), None);
    }

    #[test]
    fn test_variation_between_adjacent_years() {
        let mut set = kpis(&[
            (Kpi::ChiffreAffaires, N, 1200.0),
            (Kpi::ChiffreAffaires, N1, 1000.0),
            (Kpi::ChiffreAffaires, YearLabel::new(3), 500.0),
        ]);
        set.set_available_years(vec![N, N1, YearLabel::new(2), YearLabel::new(3)]);
        let ratios = compute_ratios(&set);

        approx(ratios.variation(N, N1), 20.0);
        assert_eq!(ratios.variation(N1, YearLabel::new(2)), None);
        assert_eq!(ratios.variation(YearLabel::new(2), YearLabel::new(3)), None);
        assert!(ratios.get_key("variation_chiffre_affaires_n_vs_n1").is_some());
    }

    #[test]
    fn test_metadata_and_serialization() {
        let ratios = compute_ratios(&kpis(&[(Kpi::ResultatExploitation, N, 100.0)]));
        let meta = ratios.metadata();
        assert_eq!(meta.processed_years, vec!["n", "n1"]);
        assert_eq!(meta.total_years, 2);
        assert!(meta.multi_document.is_none());

        let json = serde_json::to_value(&ratios).unwrap();
        assert_eq!(json["ebitda_n"], serde_json::json!(100.0));
        assert_eq!(json["_metadata"]["available_years"], serde_json::json!(["N", "N-1"]));
        let back: ComputedRatioSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, ratios);
    }
}
