//! Splits a PDF into page-range chunks for the OCR collaborator.

use crate::error::{LiasseError, Result};
use log::{debug, info};
use lopdf::Document;

/// Hard cap on pages read from a single filing.
pub const MAX_PAGES_HARD_CAP: u32 = 25;

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl PageRange {
    pub fn len(&self) -> u32 {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.first..=self.last).contains(&page)
    }
}

#[derive(Debug, Clone)]
pub struct PdfChunk {
    pub range: PageRange,
    pub bytes: Vec<u8>,
}

/// Page ranges covering the first `min(total_pages, max_pages)` pages.
///
/// `max_pages` is itself clamped to [`MAX_PAGES_HARD_CAP`].
pub fn chunk_ranges(total_pages: u32, pages_per_chunk: u32, max_pages: u32) -> Vec<PageRange> {
    let pages_per_chunk = pages_per_chunk.max(1);
    let limit = total_pages.min(max_pages.min(MAX_PAGES_HARD_CAP));

    (1..=limit)
        .step_by(pages_per_chunk as usize)
        .map(|first| PageRange {
            first,
            last: first.saturating_add(pages_per_chunk - 1).min(limit),
        })
        .collect()
}

/// Splits `pdf` into standalone documents of at most `pages_per_chunk` pages.
pub fn chunk_pdf(pdf: &[u8], pages_per_chunk: u32, max_pages: u32) -> Result<Vec<PdfChunk>> {
    let document = Document::load_mem(pdf).map_err(|e| LiasseError::Pdf(e.to_string()))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let total_pages = pages.len() as u32;

    let ranges = chunk_ranges(total_pages, pages_per_chunk, max_pages);
    info!(
        "PDF has {} pages, processing first {} in {} chunks",
        total_pages,
        ranges.last().map_or(0, |r| r.last),
        ranges.len()
    );

    let mut chunks = Vec::with_capacity(ranges.len());
    for range in ranges {
        let mut chunk = document.clone();
        let outside: Vec<u32> = pages
            .iter()
            .copied()
            .filter(|page| !range.contains(*page))
            .collect();
        chunk.delete_pages(&outside);
        chunk.prune_objects();

        let mut bytes = Vec::new();
        chunk
            .save_to(&mut bytes)
            .map_err(|e| LiasseError::Pdf(e.to_string()))?;
        debug!(
            "Chunk pages {}-{}: {} bytes",
            range.first,
            range.last,
            bytes.len()
        );
        chunks.push(PdfChunk { range, bytes });
    }

    Ok(chunks)
}

/// Joins per-chunk Markdown in page order.
pub fn join_markdown(parts: &[String]) -> String {
    parts.join("\n\n")
}
