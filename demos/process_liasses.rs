use dotenv::dotenv;
use liasse_analyzer::llm::AnthropicClient;
use liasse_analyzer::{
    AnalyzerConfig, DocumentRecord, MemoryStore, ProcessingEvent, ProfileProcessor, ProfileRecord,
    RunContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        println!("usage: process_liasses <liasse.pdf>...");
        return Ok(());
    }

    let config = Arc::new(AnalyzerConfig::load()?);
    let client = Arc::new(AnthropicClient::from_config(&config)?);

    let store = Arc::new(MemoryStore::new());
    store.insert_profile(ProfileRecord::new("demo", None))?;
    for (i, path) in paths.iter().enumerate() {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document_{}.pdf", i + 1));
        store.add_document("demo", DocumentRecord::new(format!("doc-{}", i + 1), name), bytes)?;
    }

    let processor = ProfileProcessor::new(store.clone(), client.clone(), client, config);

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProcessingEvent::DocumentStarted {
                    index,
                    total,
                    document_name,
                } => println!("[{}/{}] {}", index, total, document_name),
                ProcessingEvent::OcrChunk {
                    chunk, total_chunks, ..
                } => println!("      OCR chunk {}/{}", chunk, total_chunks),
                ProcessingEvent::CacheHit { document_name } => {
                    println!("      cached: {}", document_name)
                }
                ProcessingEvent::KpisExtracted { fiscal_year, .. } => {
                    println!("      KPIs for fiscal year {}", fiscal_year)
                }
                ProcessingEvent::DocumentFailed { failure } => {
                    println!("      {:?} failed: {}", failure.stage, failure.message)
                }
                ProcessingEvent::Completed {
                    documents,
                    failures,
                } => println!("done: {} documents, {} failures", documents, failures),
                ProcessingEvent::Failed { reason } => println!("failed: {}", reason),
                _ => {}
            }
        }
    });

    let summary = processor
        .run(&RunContext::new("demo").with_progress(tx))
        .await?;
    let _ = printer.await;

    println!("\nFiscal years: {}", summary.fiscal_years.as_deref().unwrap_or("-"));
    println!("{}", serde_json::to_string_pretty(&summary.ratios)?);
    println!("{}", serde_json::to_string_pretty(&summary.tva)?);
    Ok(())
}
