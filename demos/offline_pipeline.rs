use liasse_analyzer::{ConflictPolicy, KpiAnalyzer, Ratio};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    // Payloads shaped like the extraction model's answers for three filings.
    let payloads = vec![
        (
            "liasse_2023.pdf".to_string(),
            json!({
                "fiscal_year": 2023,
                "kpis": {
                    "Chiffre d'affaires": {"N": "12 450 300,00", "N-1": "10 980 120,00"},
                    "Résultat d'exploitation": {"N": 1_320_000, "N-1": 1_105_000},
                    "Dotations d'exploitation": {"N": 410_000, "N-1": 380_000},
                    "Résultat Net": {"N": 802_000, "N-1": 640_000},
                    "Capitaux propres": {"N": 5_600_000, "N-1": 4_950_000},
                    "Dettes de financement": {"N": 2_300_000, "N-1": 2_650_000},
                    "Trésorerie-Actif": {"N": 740_000, "N-1": 510_000}
                },
                "tva_data": {
                    "chiffre_affaires": 12_450_300,
                    "tva_facturee": 2_490_060,
                    "clients_exercice_precedent": 1_830_000,
                    "clients_exercice_brut": 2_010_000,
                    "tva_pratique": 2_440_000
                }
            }),
        ),
        (
            "liasse_2022.pdf".to_string(),
            json!({
                "fiscal_year": "2022",
                "kpis": {
                    "Chiffre d'affaires": {"N": 10_980_120, "N-1": 9_870_400},
                    "Résultat d'exploitation": {"N": 1_105_000, "N-1": 920_000},
                    "Capitaux propres": {"N": 4_950_000, "N-1": 4_400_000}
                }
            }),
        ),
        (
            "scan_illisible.pdf".to_string(),
            json!({"raw_response": "Aucun tableau détecté"}),
        ),
    ];

    let analysis = KpiAnalyzer::analyze_values(&payloads, ConflictPolicy::LastWriteWins);

    println!("Timeline: {}", analysis.mapping);
    for label in analysis.kpis.available_years() {
        let marge = analysis.ratios.get(Ratio::MargeExploitation, *label);
        let gearing = analysis.ratios.get(Ratio::Gearing, *label);
        println!(
            "{:>4}  marge d'exploitation {:>8}  gearing {:>8}",
            label.to_string(),
            marge.map_or("-".to_string(), |v| format!("{:.1}%", v)),
            gearing.map_or("-".to_string(), |v| format!("{:.1}%", v)),
        );
    }

    println!("\n{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}
