//! External services the orchestrator depends on.
//!
//! Implementations must return [`LiasseError::Service`](crate::error::LiasseError::Service)
//! for quota, overload and authentication refusals so that runs can classify
//! them. Retrying is left to the caller.

use crate::error::Result;
use async_trait::async_trait;

/// Converts one PDF chunk to Markdown.
#[async_trait]
pub trait OcrConverter: Send + Sync {
    async fn convert(&self, pdf_chunk: &[u8]) -> Result<String>;
}

/// Asks the extraction model for raw JSON text.
#[async_trait]
pub trait FinancialExtractor: Send + Sync {
    /// Expected shape: `{"fiscal_year": int, "kpis": {label: {"N", "N-1"}}}`.
    async fn extract_kpis(&self, markdown: &str, document_label: &str) -> Result<String>;

    /// Expected shape: `{"fiscal_year": int, "tva_data": {...}}`.
    async fn extract_tva(&self, markdown: &str, document_label: &str) -> Result<String>;
}
