//! Drives one profile run: documents are processed strictly in order, then
//! merged, turned into ratios and reconciled for VAT.
//!
//! The profile record is the only shared state. It is written at fixed
//! checkpoints (run start, each document, completion) so observers can poll it.

use crate::cache::CacheDecision;
use crate::chunking::{chunk_pdf, join_markdown};
use crate::collaborators::{FinancialExtractor, OcrConverter};
use crate::config::AnalyzerConfig;
use crate::error::{LiasseError, Result, ServiceErrorKind};
use crate::ingestion::document_record;
use crate::merge::{merge_documents, MergedKpiSet};
use crate::parsing::{parse_kpi_response, parse_tva_response};
use crate::profile::{
    DocumentOutcome, DocumentRecord, OcrStatus, ProcessingStage, ProfileRecord, ProfileStatus,
};
use crate::ratios::{compute_ratios, ComputedRatioSet};
use crate::schema::{RawDocumentExtraction, TvaRawData};
use crate::store::ProfileStore;
use crate::tva::TvaAnalysisSet;
use crate::utils::fiscal_year_range;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const DOCUMENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessingEvent {
    Started { profile_id: String },
    WaitingForDocuments,
    DocumentStarted { index: usize, total: usize, document_name: String },
    CacheHit { document_name: String },
    TvaRefresh { document_name: String },
    OcrChunk { document_name: String, chunk: usize, total_chunks: usize },
    KpisExtracted { document_name: String, fiscal_year: i32 },
    TvaExtracted { document_name: String },
    DocumentFailed { failure: DocumentFailure },
    Merging { documents: usize },
    ComputingRatios,
    Completed { documents: usize, failures: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Read,
    Ocr,
    Kpis,
    Tva,
}

/// A per-document failure. The run carries on without this document's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub document_name: String,
    pub stage: FailureStage,
    pub kind: Option<ServiceErrorKind>,
    pub message: String,
}

/// Everything a run needs besides the processor's collaborators.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub profile_id: String,
    /// Reference time for cache freshness.
    pub now: DateTime<Utc>,
    pub progress: Option<Sender<ProcessingEvent>>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            now: Utc::now(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Sender<ProcessingEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(LiasseError::Cancelled(self.profile_id.clone()))
        } else {
            Ok(())
        }
    }

    async fn emit(&self, event: ProcessingEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub profile_id: String,
    pub documents: usize,
    pub extracted: usize,
    pub cache_hits: usize,
    pub failures: Vec<DocumentFailure>,
    pub fiscal_years: Option<String>,
    pub kpis: MergedKpiSet,
    pub ratios: ComputedRatioSet,
    pub tva: TvaAnalysisSet,
}

#[derive(Debug)]
struct DocumentRun {
    document_name: String,
    extraction: Option<RawDocumentExtraction>,
    markdown: Option<String>,
    tva_year: Option<i32>,
    tva_data: Option<TvaRawData>,
    from_cache: bool,
    ocr_status: OcrStatus,
    failures: Vec<DocumentFailure>,
}

impl DocumentRun {
    fn new(document_name: &str) -> Self {
        Self {
            document_name: document_name.to_string(),
            extraction: None,
            markdown: None,
            tva_year: None,
            tva_data: None,
            from_cache: false,
            ocr_status: OcrStatus::Processing,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, stage: FailureStage, err: &LiasseError) -> DocumentFailure {
        warn!(
            "Document '{}' failed during {:?}: {}",
            self.document_name, stage, err
        );
        let failure = DocumentFailure {
            document_name: self.document_name.clone(),
            stage,
            kind: err.service_kind(),
            message: err.to_string(),
        };
        self.failures.push(failure.clone());
        failure
    }

    /// KPI year first, TVA response year as fallback.
    fn fiscal_year(&self) -> Option<i32> {
        self.extraction
            .as_ref()
            .map(|e| e.fiscal_year)
            .or(self.tva_year)
    }

    fn error_for(&self, stages: &[FailureStage]) -> Option<String> {
        self.failures
            .iter()
            .find(|f| stages.contains(&f.stage))
            .map(|f| f.message.clone())
    }

    fn outcome(&self) -> DocumentOutcome {
        let text_stages: &[FailureStage] = &[FailureStage::Read, FailureStage::Ocr];
        let (kpi_error, tva_error) = if self.from_cache {
            (None, self.error_for(&[FailureStage::Read, FailureStage::Ocr, FailureStage::Tva]))
        } else {
            (
                self.error_for(text_stages)
                    .or_else(|| self.error_for(&[FailureStage::Kpis])),
                self.error_for(&[FailureStage::Tva]),
            )
        };
        DocumentOutcome {
            document_name: self.document_name.clone(),
            fiscal_year: self.fiscal_year(),
            kpis: self
                .extraction
                .as_ref()
                .map(|e| e.kpis.clone())
                .unwrap_or_default(),
            tva_data: self.tva_data.clone(),
            from_cache: self.from_cache,
            kpi_error,
            tva_error,
        }
    }
}

pub struct ProfileProcessor {
    store: Arc<dyn ProfileStore>,
    ocr: Arc<dyn OcrConverter>,
    extractor: Arc<dyn FinancialExtractor>,
    config: Arc<AnalyzerConfig>,
}

impl ProfileProcessor {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        ocr: Arc<dyn OcrConverter>,
        extractor: Arc<dyn FinancialExtractor>,
        config: Arc<AnalyzerConfig>,
    ) -> Self {
        Self {
            store,
            ocr,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn log(&self, profile: &mut ProfileRecord, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", profile.id, message);
        profile
            .data
            .push_log(message, Utc::now(), self.config.processing_log_limit);
    }

    async fn checkpoint(&self, profile: &ProfileRecord) -> Result<()> {
        self.store.save_profile(profile).await
    }

    /// Runs the whole pipeline for `ctx.profile_id`.
    ///
    /// Per-document failures are reported in the summary. Fatal failures mark
    /// the profile failed, persist the reason and are returned as errors.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let mut profile = self.store.load_profile(&ctx.profile_id).await?;
        ctx.emit(ProcessingEvent::Started {
            profile_id: ctx.profile_id.clone(),
        })
        .await;

        profile.status = ProfileStatus::Processing;
        profile.data.mark_started(Utc::now());
        self.log(&mut profile, "Starting multi-document processing");
        self.checkpoint(&profile).await?;

        match self.run_stages(ctx, &mut profile).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("[{}] Processing failed: {}", profile.id, e);
                profile.status = ProfileStatus::Failed;
                profile.data.mark_failed(e.to_string(), Utc::now());
                self.log(&mut profile, format!("Processing failed: {}", e));
                if let Err(save_err) = self.checkpoint(&profile).await {
                    error!(
                        "[{}] Could not persist failure state: {}",
                        profile.id, save_err
                    );
                }
                ctx.emit(ProcessingEvent::Failed {
                    reason: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_stages(&self, ctx: &RunContext, profile: &mut ProfileRecord) -> Result<RunSummary> {
        if self.config.api_key().is_none() {
            return Err(LiasseError::MissingApiKey);
        }

        profile.data.processing_stage = Some(ProcessingStage::WaitingForDocuments);
        self.checkpoint(profile).await?;
        let mut documents = self.wait_for_documents(ctx).await?;
        let total = documents.len();

        profile.data.processing_stage = Some(ProcessingStage::ProcessingDocuments);
        profile.data.total_documents = total;
        self.log(profile, format!("Found {} documents to process", total));
        self.checkpoint(profile).await?;

        let mut runs = Vec::with_capacity(total);
        for (index, document) in documents.iter_mut().enumerate() {
            ctx.check_cancelled()?;

            profile.data.processing_stage = Some(ProcessingStage::ProcessingDocument {
                current: index + 1,
                total,
            });
            profile.data.current_document = Some(document.file_name.clone());
            self.log(
                profile,
                format!(
                    "Processing document {}/{}: {}",
                    index + 1,
                    total,
                    document.file_name
                ),
            );
            self.checkpoint(profile).await?;
            ctx.emit(ProcessingEvent::DocumentStarted {
                index: index + 1,
                total,
                document_name: document.file_name.clone(),
            })
            .await;

            let run = self.process_document(ctx, document).await?;
            self.persist_document(ctx, document, &run).await?;

            let message = match (&run.extraction, run.failures.is_empty()) {
                (Some(extraction), true) => format!(
                    "{}: fiscal year {}{}",
                    run.document_name,
                    extraction.fiscal_year,
                    if run.from_cache { " (cached)" } else { "" }
                ),
                _ => format!(
                    "{}: {} error(s), continuing",
                    run.document_name,
                    run.failures.len()
                ),
            };
            self.log(profile, message);
            runs.push(run);
        }
        ctx.check_cancelled()?;

        let extractions: Vec<RawDocumentExtraction> =
            runs.iter().filter_map(|r| r.extraction.clone()).collect();

        profile.data.processing_stage = Some(ProcessingStage::ExtractingKpis);
        profile.data.current_document = None;
        ctx.emit(ProcessingEvent::Merging {
            documents: extractions.len(),
        })
        .await;
        let kpis = merge_documents(&extractions, self.config.conflict_policy);
        self.log(
            profile,
            format!(
                "Combined KPIs from {} of {} documents",
                extractions.len(),
                total
            ),
        );

        profile.data.processing_stage = Some(ProcessingStage::ComputingRatios);
        ctx.emit(ProcessingEvent::ComputingRatios).await;
        let ratios = compute_ratios(&kpis);

        let mut tva = TvaAnalysisSet::new();
        for run in &runs {
            if let Some(data) = &run.tva_data {
                tva.add(run.fiscal_year(), data);
            }
        }

        let years: Vec<i32> = extractions.iter().map(|e| e.fiscal_year).collect();
        let fiscal_years = fiscal_year_range(&years);
        let failures: Vec<DocumentFailure> =
            runs.iter().flat_map(|r| r.failures.iter().cloned()).collect();

        profile.data.extracted_kpis = Some(kpis.clone());
        profile.data.computed_ratios = Some(ratios.clone());
        profile.data.tva_analysis = Some(tva.clone());
        profile.data.individual_document_kpis = runs.iter().map(DocumentRun::outcome).collect();
        if fiscal_years.is_some() {
            profile.data.fiscal_years = fiscal_years.clone();
        }
        profile.status = ProfileStatus::Completed;
        profile.data.mark_completed(Utc::now());
        self.log(
            profile,
            format!(
                "Processing completed: {} ratios, {} TVA analyses, {} document errors",
                ratios.len(),
                tva.len(),
                failures.len()
            ),
        );
        self.checkpoint(profile).await?;

        ctx.emit(ProcessingEvent::Completed {
            documents: total,
            failures: failures.len(),
        })
        .await;

        Ok(RunSummary {
            profile_id: profile.id.clone(),
            documents: total,
            extracted: extractions.len(),
            cache_hits: runs.iter().filter(|r| r.from_cache).count(),
            failures,
            fiscal_years,
            kpis,
            ratios,
            tva,
        })
    }

    async fn wait_for_documents(&self, ctx: &RunContext) -> Result<Vec<DocumentRecord>> {
        let deadline = Instant::now() + self.config.wait_for_documents();
        let mut announced = false;
        loop {
            let documents = self.store.list_documents(&ctx.profile_id).await?;
            if !documents.is_empty() {
                return Ok(documents);
            }
            if Instant::now() >= deadline {
                return Err(LiasseError::NoDocuments);
            }
            if !announced {
                ctx.emit(ProcessingEvent::WaitingForDocuments).await;
                announced = true;
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(LiasseError::Cancelled(ctx.profile_id.clone()));
                }
                _ = sleep(DOCUMENT_POLL_INTERVAL) => {}
            }
        }
    }

    async fn process_document(
        &self,
        ctx: &RunContext,
        document: &DocumentRecord,
    ) -> Result<DocumentRun> {
        let name = document.file_name.as_str();
        let mut run = DocumentRun::new(name);

        let decision = CacheDecision::evaluate(
            document.extracted_data.as_ref(),
            name,
            ctx.now,
            self.config.cache_max_age(),
        );

        match decision {
            CacheDecision::Reuse(extraction) => {
                info!("Using cached extraction for '{}'", name);
                ctx.emit(ProcessingEvent::CacheHit {
                    document_name: name.to_string(),
                })
                .await;
                run.from_cache = true;
                run.ocr_status = OcrStatus::Completed;
                run.tva_data = extraction.tva_data.clone();
                run.extraction = Some(extraction);
            }
            CacheDecision::RefreshTva {
                extraction,
                markdown,
            } => {
                info!("KPIs cached for '{}', re-extracting TVA only", name);
                ctx.emit(ProcessingEvent::TvaRefresh {
                    document_name: name.to_string(),
                })
                .await;
                run.from_cache = true;
                run.ocr_status = OcrStatus::Completed;
                run.extraction = Some(extraction);

                let markdown = match markdown {
                    Some(text) => Some(text),
                    None => self.ocr_document(ctx, document, &mut run).await?,
                };
                if let Some(text) = markdown {
                    self.extract_tva(ctx, &text, &mut run).await;
                    run.markdown = Some(text);
                }
            }
            CacheDecision::Reprocess => {
                let Some(text) = self.ocr_document(ctx, document, &mut run).await? else {
                    run.ocr_status = OcrStatus::Failed;
                    return Ok(run);
                };
                run.ocr_status = OcrStatus::Completed;
                ctx.check_cancelled()?;
                self.extract_kpis(ctx, &text, &mut run).await;
                ctx.check_cancelled()?;
                self.extract_tva(ctx, &text, &mut run).await;
                run.markdown = Some(text);
            }
        }

        if let (Some(extraction), Some(tva)) = (run.extraction.as_mut(), run.tva_data.as_ref()) {
            extraction.tva_data = Some(tva.clone());
        }
        Ok(run)
    }

    /// OCRs the document chunk by chunk. `Ok(None)` means the failure was recorded on `run`.
    async fn ocr_document(
        &self,
        ctx: &RunContext,
        document: &DocumentRecord,
        run: &mut DocumentRun,
    ) -> Result<Option<String>> {
        let bytes = match self.store.read_document(&ctx.profile_id, &document.id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let failure = run.fail(FailureStage::Read, &e);
                ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
                return Ok(None);
            }
        };

        let chunks = match chunk_pdf(&bytes, self.config.pages_per_chunk, self.config.max_pages) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => {
                let failure = run.fail(FailureStage::Ocr, &LiasseError::Pdf("document has no pages".to_string()));
                ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
                return Ok(None);
            }
            Err(e) => {
                let failure = run.fail(FailureStage::Ocr, &e);
                ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
                return Ok(None);
            }
        };

        let total_chunks = chunks.len();
        let mut parts = Vec::with_capacity(total_chunks);
        for (i, chunk) in chunks.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.emit(ProcessingEvent::OcrChunk {
                document_name: run.document_name.clone(),
                chunk: i + 1,
                total_chunks,
            })
            .await;
            match self.ocr.convert(&chunk.bytes).await {
                Ok(markdown) => parts.push(markdown),
                Err(e) => {
                    let failure = run.fail(FailureStage::Ocr, &e);
                    ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
                    return Ok(None);
                }
            }
        }

        Ok(Some(format!(
            "# Document: {}\n\n{}",
            run.document_name,
            join_markdown(&parts)
        )))
    }

    async fn extract_kpis(&self, ctx: &RunContext, markdown: &str, run: &mut DocumentRun) {
        let name = run.document_name.clone();
        let parsed = match self.extractor.extract_kpis(markdown, &name).await {
            Ok(text) => parse_kpi_response(&text, &name),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(mut extraction) => {
                extraction.document_name = name.clone();
                ctx.emit(ProcessingEvent::KpisExtracted {
                    document_name: name,
                    fiscal_year: extraction.fiscal_year,
                })
                .await;
                run.extraction = Some(extraction);
            }
            Err(e) => {
                let failure = run.fail(FailureStage::Kpis, &e);
                ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
            }
        }
    }

    async fn extract_tva(&self, ctx: &RunContext, markdown: &str, run: &mut DocumentRun) {
        let name = run.document_name.clone();
        let parsed = match self.extractor.extract_tva(markdown, &name).await {
            Ok(text) => parse_tva_response(&text, &name),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(parsed) => {
                run.tva_year = parsed.fiscal_year;
                if parsed.tva_data.is_some() {
                    ctx.emit(ProcessingEvent::TvaExtracted { document_name: name }).await;
                }
                run.tva_data = parsed.tva_data;
            }
            Err(e) => {
                let failure = run.fail(FailureStage::Tva, &e);
                ctx.emit(ProcessingEvent::DocumentFailed { failure }).await;
            }
        }
    }

    /// Writes the document's per-run state back to the store.
    ///
    /// Cached records keep their original `processing_timestamp`, so a TVA
    /// refresh does not extend the KPI cache lifetime.
    async fn persist_document(
        &self,
        ctx: &RunContext,
        document: &mut DocumentRecord,
        run: &DocumentRun,
    ) -> Result<()> {
        document.ocr_status = run.ocr_status;
        document.error = (!run.failures.is_empty()).then(|| {
            run.failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        });

        match (&run.extraction, run.from_cache) {
            (Some(extraction), false) => {
                document.extracted_data = Some(document_record(
                    extraction,
                    run.markdown.as_deref(),
                    Utc::now(),
                ));
            }
            (Some(_), true) => {
                if let Some(Value::Object(record)) = document.extracted_data.as_mut() {
                    if let Some(tva) = &run.tva_data {
                        record.insert("tva_data".to_string(), serde_json::to_value(tva)?);
                    }
                    if let Some(markdown) = &run.markdown {
                        record.insert("markdown".to_string(), Value::String(markdown.clone()));
                    }
                }
            }
            (None, _) => {}
        }

        self.store.save_document(&ctx.profile_id, document).await
    }
}
