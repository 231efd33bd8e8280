//! # Liasse Analyzer
//!
//! Reconciles KPIs extracted from several Moroccan liasses fiscales (one filing
//! per fiscal year) into a single multi-year timeline, then derives financial
//! ratios and a VAT reconciliation from it.
//!
//! ## Core Concepts
//!
//! - **Raw extraction**: what the extraction model returned for one filing, its
//!   fiscal year plus an `N` / `N-1` pair per KPI
//! - **Timeline**: absolute fiscal years mapped to labels `N`, `N-1`, …, anchored
//!   on the most recent filing
//! - **Merged KPIs**: one value per KPI and label, with an explicit conflict policy
//! - **Ratios**: EBITDA, net debt, margins, ROE, ROCE, gearing, debt coverage,
//!   net cash and revenue variation, computed per year and omitted when inputs
//!   are missing
//! - **TVA**: theoretical VAT from table B14 compared with the declared amount
//!
//! The pure pipeline lives in [`KpiAnalyzer`]. [`orchestrator::ProfileProcessor`]
//! adds OCR, extraction, caching and persistence around it.
//!
//! ## Example
//!
//! ```rust
//! use liasse_analyzer::*;
//! use serde_json::json;
//!
//! let extractions = vec![
//!     RawDocumentExtraction::new("liasse_2023.pdf", 2023)
//!         .with_kpi(Kpi::ChiffreAffaires, json!(1200), json!(1000))
//!         .with_kpi(Kpi::ResultatExploitation, json!(150), json!(120)),
//!     RawDocumentExtraction::new("liasse_2022.pdf", 2022)
//!         .with_kpi(Kpi::ChiffreAffaires, json!(1000), json!(900)),
//! ];
//!
//! let analysis = KpiAnalyzer::analyze(&extractions, ConflictPolicy::LastWriteWins);
//! assert_eq!(analysis.kpis.get(Kpi::ChiffreAffaires, YearLabel::new(2)), Some(900.0));
//! assert_eq!(analysis.ratios.get(Ratio::MargeExploitation, YearLabel::N), Some(12.5));
//! ```

pub mod cache;
pub mod chunking;
pub mod coercion;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod merge;
pub mod orchestrator;
pub mod parsing;
pub mod profile;
pub mod ratios;
pub mod schema;
pub mod store;
pub mod timeline;
pub mod tva;
pub mod utils;
pub mod worker;

#[cfg(feature = "anthropic")]
pub mod llm;

pub use cache::{is_cached_valid, CacheDecision};
pub use coercion::{coerce, coerce_as_string, coerce_year};
pub use collaborators::{FinancialExtractor, OcrConverter};
pub use config::AnalyzerConfig;
pub use error::{LiasseError, Result, ServiceErrorKind};
pub use merge::{
    merge_documents, merge_extractions, ConflictPolicy, MergeConflict, MergeMetadata,
    MergedKpiSet,
};
pub use orchestrator::{
    DocumentFailure, FailureStage, ProcessingEvent, ProfileProcessor, RunContext, RunSummary,
};
pub use parsing::{parse_kpi_response, parse_tva_response, safe_parse_json};
pub use profile::{
    DocumentOutcome, DocumentRecord, OcrStatus, ProcessingStage, ProfileData, ProfileRecord,
    ProfileStatus,
};
pub use ratios::{compute_ratios, ComputedRatioSet, Ratio, RatioEngine};
pub use schema::*;
pub use store::{MemoryStore, ProfileStore};
pub use timeline::{FiscalYearMapping, LabelReassignment, YearLabel};
pub use tva::{reconcile, TvaAnalysis, TvaAnalysisSet};
pub use worker::{JobHandle, ProfileWorker};

use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeSet;

/// Result of the pure pipeline over a set of extractions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub mapping: FiscalYearMapping,
    pub kpis: MergedKpiSet,
    pub ratios: ComputedRatioSet,
    pub tva: TvaAnalysisSet,
}

pub struct KpiAnalyzer;

impl KpiAnalyzer {
    /// Timeline, merge, ratios and TVA for already-extracted documents.
    ///
    /// Never fails: missing inputs only shrink the output.
    pub fn analyze(extractions: &[RawDocumentExtraction], policy: ConflictPolicy) -> Analysis {
        info!("Analyzing {} extractions", extractions.len());

        let years: BTreeSet<i32> = extractions.iter().map(|e| e.fiscal_year).collect();
        let mapping = FiscalYearMapping::build(&years);
        debug!("Timeline: {}", mapping);

        let kpis = merge_extractions(extractions, &mapping, policy);
        let ratios = compute_ratios(&kpis);

        let mut tva = TvaAnalysisSet::new();
        for extraction in extractions {
            if let Some(data) = &extraction.tva_data {
                tva.add(Some(extraction.fiscal_year), data);
            }
        }

        Analysis {
            mapping,
            kpis,
            ratios,
            tva,
        }
    }

    /// Like [`analyze`](Self::analyze) for untyped payloads; invalid ones are skipped.
    pub fn analyze_values(
        payloads: &[(String, serde_json::Value)],
        policy: ConflictPolicy,
    ) -> Analysis {
        let (extractions, rejected) = ingestion::validate_extractions(payloads);
        if !rejected.is_empty() {
            info!("{} payloads rejected before merge", rejected.len());
        }
        Self::analyze(&extractions, policy)
    }
}

pub fn analyze(extractions: &[RawDocumentExtraction]) -> Analysis {
    KpiAnalyzer::analyze(extractions, ConflictPolicy::default())
}
