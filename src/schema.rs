use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The fixed KPI vocabulary requested from the extraction model.
///
/// Variants serialize to the French row labels used in the filings and in the
/// extraction prompt. Internally only the enum is used.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Kpi {
    #[serde(rename = "Chiffre d'affaires")]
    ChiffreAffaires,
    #[serde(rename = "Résultat d'exploitation")]
    ResultatExploitation,
    #[serde(rename = "Résultat Net")]
    ResultatNet,
    #[serde(rename = "Dotations d'exploitation")]
    DotationsExploitation,
    #[serde(rename = "Reprises d'exploitation; transferts de charges")]
    ReprisesExploitation,
    #[serde(rename = "Redevances de crédit-bail")]
    RedevancesCreditBail,
    #[serde(rename = "Trésorerie-Actif")]
    TresorerieActif,
    #[serde(rename = "Titres Valeurs de placement")]
    TitresValeursPlacement,
    #[serde(rename = "Dettes de financement")]
    DettesFinancement,
    #[serde(rename = "Trésorerie-passif")]
    TresoreriePassif,
    #[serde(rename = "Compte d'associés (Actif)")]
    ComptesAssociesActif,
    #[serde(rename = "Compte d'associés (Passif)")]
    ComptesAssociesPassif,
    #[serde(rename = "Redevanes restant à payer (a plus d'un an)")]
    RedevancesPlusUnAn,
    #[serde(rename = "Redevanes restant à payer (a moins d'un an)")]
    RedevancesMoinsUnAn,
    #[serde(rename = "Prix d'achat résiduel en fin du contrat")]
    PrixAchatResiduel,
    #[serde(rename = "Capitaux propres")]
    CapitauxPropres,
    #[serde(rename = "Trésorerie nette")]
    TresorerieNette,
    #[serde(rename = "Actif circulant")]
    ActifCirculant,
    #[serde(rename = "Passif circulant")]
    PassifCirculant,
    #[serde(rename = "Actif circulant total")]
    ActifCirculantTotal,
}

impl Kpi {
    pub const ALL: [Kpi; 20] = [
        Kpi::ChiffreAffaires,
        Kpi::ResultatExploitation,
        Kpi::ResultatNet,
        Kpi::DotationsExploitation,
        Kpi::ReprisesExploitation,
        Kpi::RedevancesCreditBail,
        Kpi::TresorerieActif,
        Kpi::TitresValeursPlacement,
        Kpi::DettesFinancement,
        Kpi::TresoreriePassif,
        Kpi::ComptesAssociesActif,
        Kpi::ComptesAssociesPassif,
        Kpi::RedevancesPlusUnAn,
        Kpi::RedevancesMoinsUnAn,
        Kpi::PrixAchatResiduel,
        Kpi::CapitauxPropres,
        Kpi::TresorerieNette,
        Kpi::ActifCirculant,
        Kpi::PassifCirculant,
        Kpi::ActifCirculantTotal,
    ];

    /// P&L and balance-sheet items always present (possibly empty) in a merged set.
    pub const CANONICAL: [Kpi; 16] = [
        Kpi::ChiffreAffaires,
        Kpi::ResultatExploitation,
        Kpi::ResultatNet,
        Kpi::DotationsExploitation,
        Kpi::ReprisesExploitation,
        Kpi::RedevancesCreditBail,
        Kpi::TresorerieActif,
        Kpi::TitresValeursPlacement,
        Kpi::DettesFinancement,
        Kpi::TresoreriePassif,
        Kpi::ComptesAssociesActif,
        Kpi::ComptesAssociesPassif,
        Kpi::RedevancesPlusUnAn,
        Kpi::RedevancesMoinsUnAn,
        Kpi::PrixAchatResiduel,
        Kpi::CapitauxPropres,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Kpi::ChiffreAffaires => "Chiffre d'affaires",
            Kpi::ResultatExploitation => "Résultat d'exploitation",
            Kpi::ResultatNet => "Résultat Net",
            Kpi::DotationsExploitation => "Dotations d'exploitation",
            Kpi::ReprisesExploitation => "Reprises d'exploitation; transferts de charges",
            Kpi::RedevancesCreditBail => "Redevances de crédit-bail",
            Kpi::TresorerieActif => "Trésorerie-Actif",
            Kpi::TitresValeursPlacement => "Titres Valeurs de placement",
            Kpi::DettesFinancement => "Dettes de financement",
            Kpi::TresoreriePassif => "Trésorerie-passif",
            Kpi::ComptesAssociesActif => "Compte d'associés (Actif)",
            Kpi::ComptesAssociesPassif => "Compte d'associés (Passif)",
            Kpi::RedevancesPlusUnAn => "Redevanes restant à payer (a plus d'un an)",
            Kpi::RedevancesMoinsUnAn => "Redevanes restant à payer (a moins d'un an)",
            Kpi::PrixAchatResiduel => "Prix d'achat résiduel en fin du contrat",
            Kpi::CapitauxPropres => "Capitaux propres",
            Kpi::TresorerieNette => "Trésorerie nette",
            Kpi::ActifCirculant => "Actif circulant",
            Kpi::PassifCirculant => "Passif circulant",
            Kpi::ActifCirculantTotal => "Actif circulant total",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Kpi::ChiffreAffaires => "chiffre_affaires",
            Kpi::ResultatExploitation => "resultat_exploitation",
            Kpi::ResultatNet => "resultat_net",
            Kpi::DotationsExploitation => "dotations_exploitation",
            Kpi::ReprisesExploitation => "reprises_exploitation",
            Kpi::RedevancesCreditBail => "redevances_credit_bail",
            Kpi::TresorerieActif => "tresorerie_actif",
            Kpi::TitresValeursPlacement => "titres_valeurs_placement",
            Kpi::DettesFinancement => "dettes_financement",
            Kpi::TresoreriePassif => "tresorerie_passif",
            Kpi::ComptesAssociesActif => "comptes_associes_actif",
            Kpi::ComptesAssociesPassif => "comptes_associes_passif",
            Kpi::RedevancesPlusUnAn => "redevances_plus_un_an",
            Kpi::RedevancesMoinsUnAn => "redevances_moins_un_an",
            Kpi::PrixAchatResiduel => "prix_achat_residuel",
            Kpi::CapitauxPropres => "capitaux_propres",
            Kpi::TresorerieNette => "tresorerie_nette",
            Kpi::ActifCirculant => "actif_circulant",
            Kpi::PassifCirculant => "passif_circulant",
            Kpi::ActifCirculantTotal => "actif_circulant_total",
        }
    }

    pub fn is_canonical(self) -> bool {
        Self::CANONICAL.contains(&self)
    }

    /// Resolves a label written by the extraction model.
    ///
    /// Accepts the display label, the snake key, case/spacing variants of either,
    /// and the correctly spelled "Redevances restant à payer" rows.
    pub fn from_label(raw: &str) -> Option<Kpi> {
        let wanted = normalize_label(raw);
        if wanted.is_empty() {
            return None;
        }

        let found = Self::ALL.iter().copied().find(|kpi| {
            normalize_label(kpi.label()) == wanted || normalize_label(kpi.key()) == wanted
        });
        if found.is_some() {
            return found;
        }

        let respelled = wanted.replacen("redevances restant", "redevanes restant", 1);
        Self::ALL
            .iter()
            .copied()
            .find(|kpi| normalize_label(kpi.label()) == respelled)
    }
}

impl fmt::Display for Kpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .replace(['’', '`'], "'")
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The two columns a single filing reports for a KPI, as written by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawYearPair {
    #[serde(rename = "N", default)]
    pub current: Value,
    #[serde(rename = "N-1", default)]
    pub previous: Value,
}

/// Raw figures from table B14 ("Détail de la Taxe sur la Valeur Ajoutée").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TvaRawData {
    #[serde(default)]
    #[schemars(description = "T.V.A. facturée, column 'Opérations comptables de l'exercice'")]
    pub tva_facturee: Value,

    #[serde(default)]
    #[schemars(description = "T.V.A. facturée, column 'Déclarations T.V.A de l'exercice'")]
    pub tva_pratique: Value,

    #[serde(default)]
    #[schemars(description = "Clients et comptes rattachés de l'exercice précédent")]
    pub clients_exercice_precedent: Value,

    #[serde(default)]
    #[schemars(description = "Clients et comptes rattachés, montant brut de l'exercice")]
    pub clients_exercice_brut: Value,

    #[serde(default)]
    #[schemars(description = "Chiffre d'affaires de l'exercice")]
    pub chiffre_affaires: Value,
}

impl TvaRawData {
    pub fn is_empty(&self) -> bool {
        [
            &self.tva_facturee,
            &self.tva_pratique,
            &self.clients_exercice_precedent,
            &self.clients_exercice_brut,
            &self.chiffre_affaires,
        ]
        .iter()
        .all(|v| v.is_null())
    }
}

/// Shape requested from the model for the TVA pass.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TvaExtractionResponse {
    #[schemars(description = "Fiscal year (N) covered by the filing, e.g. 2023")]
    pub fiscal_year: Option<i32>,
    pub tva_data: TvaRawData,
}

impl TvaExtractionResponse {
    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(TvaExtractionResponse);
        serde_json::to_string_pretty(&schema)
    }
}

/// Output of the per-document extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawDocumentExtraction {
    pub document_name: String,
    /// The year of the filing's primary (`N`) column.
    pub fiscal_year: i32,
    #[serde(default)]
    pub kpis: BTreeMap<Kpi, RawYearPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva_data: Option<TvaRawData>,
}

impl RawDocumentExtraction {
    pub fn new(document_name: impl Into<String>, fiscal_year: i32) -> Self {
        Self {
            document_name: document_name.into(),
            fiscal_year,
            kpis: BTreeMap::new(),
            tva_data: None,
        }
    }

    /// Builder-style helper used by tests and demos.
    pub fn with_kpi(mut self, kpi: Kpi, current: Value, previous: Value) -> Self {
        self.kpis.insert(kpi, RawYearPair { current, previous });
        self
    }

    pub fn with_tva(mut self, tva: TvaRawData) -> Self {
        self.tva_data = Some(tva);
        self
    }
}
