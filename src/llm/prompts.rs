// Prompts for the OCR, KPI and TVA passes. Filings are Moroccan liasses fiscales.

use crate::schema::{Kpi, TvaExtractionResponse};

pub const OCR_PROMPT: &str = r#"Tu es un analyste financier expert en liasses fiscales marocaines.
Analyse le PDF fourni et convertis l'intégralité de son contenu en Markdown.

Règles :
1. N'omets aucun texte ni aucun tableau.
2. Reproduis chaque tableau en entier, ligne par ligne et colonne par colonne.
3. Ne résume rien.
4. Conserve la structure et l'ordre d'origine.
5. Réponds uniquement avec le Markdown."#;

const KPI_INSTRUCTIONS: &str = r#"Identifie :
1. L'année fiscale principale (N) couverte par ce document.
2. Pour chaque indicateur ci-dessous, la valeur de l'exercice N et celle de l'exercice N-1 si elle figure dans le document.

Indicateurs :"#;

const KPI_OUTPUT_FORMAT: &str = r#"Réponds uniquement avec un JSON de la forme :
{
  "fiscal_year": 2023,
  "kpis": {
    "Chiffre d'affaires": {"N": valeur_n, "N-1": valeur_n_moins_1},
    "Résultat Net": {"N": valeur_n, "N-1": valeur_n_moins_1},
    ...
  }
}

Utilise exactement les libellés ci-dessus comme clés.
Si une valeur est introuvable, utilise null. N'invente aucun chiffre."#;

const TVA_INSTRUCTIONS: &str = r#"Dans le tableau B14 "Détail de la Taxe sur la Valeur Ajoutée", relève :
1. tva_facturee : ligne "T.V.A. Facturée", colonne "Opérations comptables de l'exercice".
2. tva_pratique : ligne "T.V.A. Facturée", colonne "Déclarations T.V.A de l'exercice".
3. clients_exercice_precedent : "Clients et comptes rattachés" de l'exercice précédent.
4. clients_exercice_brut : "Clients et comptes rattachés", montant brut de l'exercice.
5. chiffre_affaires : chiffre d'affaires de l'exercice.

Réponds uniquement avec un JSON conforme au schéma suivant. Si une valeur est introuvable, utilise null."#;

fn header(document_label: &str) -> String {
    format!(
        "Tu es un analyste financier expert en fiscalité marocaine. \
         Analyse ce document fiscal ({}).",
        document_label
    )
}

pub fn kpi_prompt(document_label: &str, markdown: &str) -> String {
    let indicators: Vec<String> = Kpi::ALL
        .iter()
        .map(|kpi| format!("- {}", kpi.label()))
        .collect();
    format!(
        "{}\n\n{}\n{}\n\n{}\n\n{}",
        header(document_label),
        KPI_INSTRUCTIONS,
        indicators.join("\n"),
        KPI_OUTPUT_FORMAT,
        markdown
    )
}

pub fn tva_prompt(document_label: &str, markdown: &str) -> String {
    let schema = TvaExtractionResponse::schema_as_json().unwrap_or_default();
    format!(
        "{}\n\n{}\n\n{}\n\n{}",
        header(document_label),
        TVA_INSTRUCTIONS,
        schema,
        markdown
    )
}
