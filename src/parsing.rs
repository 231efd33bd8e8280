//! Tolerant JSON parsing for model responses.
//!
//! Responses are tried as-is, then inside ```json fences, then as the first
//! balanced `{...}`/`[...]` block, then as the widest brace span.

use crate::coercion::coerce_year;
use crate::error::{LiasseError, Result};
use crate::ingestion::{extraction_from_value, tva_from_value};
use crate::schema::{RawDocumentExtraction, TvaRawData};
use log::{debug, warn};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?i)```(?:json)?\s*([\s\S]*?)```").ok())
        .as_ref()
}

fn block_regex() -> Option<&'static Regex> {
    static BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
    BLOCK
        .get_or_init(|| Regex::new(r"(\{[\s\S]*\}|\[[\s\S]*\])").ok())
        .as_ref()
}

/// Returns the first balanced JSON object or array in `text`, honouring string literals.
fn first_balanced_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_candidate(candidate: &str) -> Option<Value> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }
    if let Some(block) = first_balanced_block(candidate) {
        if let Ok(value) = serde_json::from_str(block) {
            return Some(value);
        }
    }
    block_regex()
        .and_then(|re| re.captures(candidate))
        .and_then(|caps| caps.get(1))
        .and_then(|m| serde_json::from_str(m.as_str()).ok())
}

/// Best-effort extraction of a JSON value from a noisy model response.
pub fn safe_parse_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let mut candidates: Vec<&str> = fence_regex()
        .map(|re| {
            re.captures_iter(text)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect()
        })
        .unwrap_or_default();
    candidates.push(text);

    let parsed = candidates.into_iter().find_map(parse_candidate);
    if parsed.is_none() {
        debug!("No JSON found in response of {} chars", text.len());
    }
    parsed
}

fn first_object(value: Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value),
        Value::Array(items) => items.into_iter().find(Value::is_object),
        _ => None,
    }
}

/// Parses the KPI pass response into a typed extraction.
pub fn parse_kpi_response(text: &str, document_name: &str) -> Result<RawDocumentExtraction> {
    let value = safe_parse_json(text)
        .and_then(first_object)
        .ok_or_else(|| LiasseError::UnparseableResponse {
            document: document_name.to_string(),
            payload: "KPI",
        })?;
    extraction_from_value(&value, document_name)
}

/// Result of the TVA pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTva {
    pub fiscal_year: Option<i32>,
    pub tva_data: Option<TvaRawData>,
}

/// Parses the TVA pass response.
///
/// Accepts `{"fiscal_year", "tva_data": {...}}` as well as a bare TVA object.
pub fn parse_tva_response(text: &str, document_name: &str) -> Result<ParsedTva> {
    let value = safe_parse_json(text)
        .and_then(first_object)
        .ok_or_else(|| LiasseError::UnparseableResponse {
            document: document_name.to_string(),
            payload: "TVA",
        })?;

    let fiscal_year = value.get("fiscal_year").and_then(coerce_year);
    let tva_data = match value.get("tva_data") {
        Some(block) => tva_from_value(block),
        None => tva_from_value(&value),
    };
    if tva_data.is_none() {
        warn!("TVA response for '{}' carried no figures", document_name);
    }

    Ok(ParsedTva {
        fiscal_year,
        tva_data,
    })
}
