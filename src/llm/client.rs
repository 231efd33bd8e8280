use crate::collaborators::{FinancialExtractor, OcrConverter};
use crate::config::AnalyzerConfig;
use crate::error::{LiasseError, Result};
use crate::llm::prompts::{kpi_prompt, tva_prompt, OCR_PROMPT};
use crate::llm::types::*;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use reqwest::Client;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client used for both PDF-to-Markdown conversion and extraction.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    ocr_max_tokens: u32,
    extraction_max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        let defaults = AnalyzerConfig::default();
        Self {
            client: Client::new(),
            api_key,
            base_url: defaults.api_base_url,
            model: model.into(),
            ocr_max_tokens: defaults.ocr_max_tokens,
            extraction_max_tokens: defaults.extraction_max_tokens,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or(LiasseError::MissingApiKey)?;
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            ocr_max_tokens: config.ocr_max_tokens,
            extraction_max_tokens: config.extraction_max_tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(
        &self,
        service: &'static str,
        max_tokens: u32,
        content: Vec<ContentBlock>,
    ) -> Result<String> {
        let url = format!("{}/messages", self.base_url);
        let payload = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message::user(content)],
        };

        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                LiasseError::service(service, e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = res.status();
        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(LiasseError::service(
                service,
                Some(status.as_u16()),
                format!("status {}: {}", status, err_text),
            ));
        }

        let body: MessagesResponse = res.json().await?;
        let text = body.first_text().ok_or_else(|| {
            LiasseError::service(service, None, "response contained no text block")
        })?;
        debug!("{} response: {} chars", service, text.len());
        Ok(text)
    }
}

#[async_trait]
impl OcrConverter for AnthropicClient {
    async fn convert(&self, pdf_chunk: &[u8]) -> Result<String> {
        let content = vec![
            ContentBlock::pdf_base64(STANDARD.encode(pdf_chunk)),
            ContentBlock::text(OCR_PROMPT),
        ];
        self.send("OCR", self.ocr_max_tokens, content).await
    }
}

#[async_trait]
impl FinancialExtractor for AnthropicClient {
    async fn extract_kpis(&self, markdown: &str, document_label: &str) -> Result<String> {
        let prompt = kpi_prompt(document_label, markdown);
        self.send(
            "KPI extraction",
            self.extraction_max_tokens,
            vec![ContentBlock::text(prompt)],
        )
        .await
    }

    async fn extract_tva(&self, markdown: &str, document_label: &str) -> Result<String> {
        let prompt = tva_prompt(document_label, markdown);
        self.send(
            "TVA extraction",
            self.extraction_max_tokens,
            vec![ContentBlock::text(prompt)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        let err = AnthropicClient::from_config(&AnalyzerConfig::default()).err();
        assert!(matches!(err, Some(LiasseError::MissingApiKey)));

        let config = AnalyzerConfig {
            api_base_url: "http://localhost:8080/v1/".to_string(),
            ..AnalyzerConfig::default()
        }
        .with_api_key("sk-test");
        let client = AnthropicClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model, "claude-sonnet-4-20250514");
        assert_eq!(client.ocr_max_tokens, 8192);
    }
}
