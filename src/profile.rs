//! Persisted profile and document records.
//!
//! The store keeps these as JSON blobs; [`ProfileData`] is the typed view the
//! orchestrator reads and writes at its checkpoints. Unknown keys written by
//! other components are preserved.

use crate::error::Result;
use crate::merge::MergedKpiSet;
use crate::ratios::ComputedRatioSet;
use crate::schema::{Kpi, RawYearPair, TvaRawData};
use crate::tva::TvaAnalysisSet;
use crate::utils::truncate_front;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProcessingStage {
    Initializing,
    WaitingForDocuments,
    ProcessingDocuments,
    ProcessingDocument { current: usize, total: usize },
    ExtractingKpis,
    ComputingRatios,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::WaitingForDocuments => f.write_str("waiting_for_documents"),
            Self::ProcessingDocuments => f.write_str("processing_documents"),
            Self::ProcessingDocument { current, total } => {
                write!(f, "processing_document_{}_of_{}", current, total)
            }
            Self::ExtractingKpis => f.write_str("extracting_kpis"),
            Self::ComputingRatios => f.write_str("computing_ratios"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One uploaded filing. The PDF bytes live in the store under `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub extracted_data: Option<Value>,
    #[serde(default)]
    pub ocr_status: OcrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentRecord {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            extracted_data: None,
            ocr_status: OcrStatus::Pending,
            error: None,
        }
    }
}

/// What one document contributed to the last run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentOutcome {
    pub document_name: String,
    pub fiscal_year: Option<i32>,
    #[serde(default)]
    pub kpis: BTreeMap<Kpi, RawYearPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva_data: Option<TvaRawData>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpi_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_stage: Option<ProcessingStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_document: Option<String>,
    #[serde(default)]
    pub total_documents: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_log: Vec<ProcessingLogEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_kpis: Option<MergedKpiSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_ratios: Option<ComputedRatioSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva_analysis: Option<TvaAnalysisSet>,
    #[serde(default)]
    pub individual_document_kpis: Vec<DocumentOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_years: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProfileData {
    pub fn from_json(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(ProfileData);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// Appends to the log, keeping only the newest `limit` entries.
    pub fn push_log(&mut self, message: impl Into<String>, at: DateTime<Utc>, limit: usize) {
        self.processing_log.push(ProcessingLogEntry {
            at,
            message: message.into(),
        });
        truncate_front(&mut self.processing_log, limit);
    }

    /// Resets run markers at the start of a run. Previous results stay visible.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.processing_stage = Some(ProcessingStage::Initializing);
        self.last_run_started_at = Some(at);
        self.last_run_finished_at = None;
        self.current_document = None;
        self.error = None;
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.processing_stage = Some(ProcessingStage::Completed);
        self.current_document = None;
        self.last_run_finished_at = Some(at);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.processing_stage = Some(ProcessingStage::Failed);
        self.error = Some(reason.into());
        self.last_error_at = Some(at);
        self.last_run_finished_at = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub status: ProfileStatus,
    #[serde(default)]
    pub data: ProfileData,
}

impl ProfileRecord {
    pub fn new(id: impl Into<String>, company_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            company_name,
            status: ProfileStatus::Pending,
            data: ProfileData::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_log_is_bounded() {
        let mut data = ProfileData::default();
        for i in 0..25 {
            data.push_log(format!("step {}", i), at(i), 20);
        }
        assert_eq!(data.processing_log.len(), 20);
        assert_eq!(data.processing_log[0].message, "step 5");
        assert_eq!(data.processing_log[19].message, "step 24");
    }

    #[test]
    fn test_stage_serialization() {
        let stage = ProcessingStage::ProcessingDocument {
            current: 2,
            total: 3,
        };
        assert_eq!(
            serde_json::to_value(stage).unwrap(),
            json!({"stage": "processing_document", "current": 2, "total": 3})
        );
        assert_eq!(
            serde_json::to_value(ProcessingStage::ComputingRatios).unwrap(),
            json!({"stage": "computing_ratios"})
        );
        assert_eq!(stage.to_string(), "processing_document_2_of_3");
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let raw = json!({
            "fiscal_years": "2022-2023",
            "total_documents": 2,
            "report_template": {"lang": "fr"}
        });
        let data = ProfileData::from_json(&raw).unwrap();
        assert_eq!(data.fiscal_years.as_deref(), Some("2022-2023"));
        assert_eq!(data.extra["report_template"], json!({"lang": "fr"}));

        let back = data.to_json().unwrap();
        assert_eq!(back["report_template"]["lang"], "fr");
        assert!(back.get("computed_ratios").is_none());
    }

    #[test]
    fn test_null_blob_is_empty_profile() {
        assert_eq!(ProfileData::from_json(&Value::Null).unwrap(), ProfileData::default());
    }

    #[test]
    fn test_failure_markers() {
        let mut data = ProfileData::default();
        data.mark_started(at(0));
        data.mark_failed("No documents", at(1));
        assert_eq!(data.processing_stage, Some(ProcessingStage::Failed));
        assert_eq!(data.error.as_deref(), Some("No documents"));
        assert_eq!(data.last_error_at, Some(at(1)));

        data.mark_started(at(2));
        assert!(data.error.is_none());
        assert_eq!(data.last_run_started_at, Some(at(2)));
    }

    #[test]
    fn test_schema_is_available() {
        let schema = ProfileData::schema_as_json().unwrap();
        assert!(schema.contains("individual_document_kpis"));
        assert!(schema.contains("processing_log"));
    }
}
