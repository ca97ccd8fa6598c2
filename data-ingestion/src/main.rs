use anyhow::{Context, Result};
use signal_generation::{load_settings, SignalEngine};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};

mod reader;

const DEFAULT_SETTINGS_PATH: &str = "config/engine.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let documents_path: PathBuf = args
        .next()
        .context("usage: data-ingestion <documents.jsonl> [settings.toml]")?
        .into();
    let settings_path = args.next().unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());

    let settings = load_settings(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path))?;

    // Initialize logging
    let level = settings.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚀 Starting news signal ingestion");

    let file = reader::read_documents(&documents_path)?;
    if file.skipped > 0 {
        warn!("{} malformed lines skipped", file.skipped);
    }
    info!(
        "Loaded {} documents from {}",
        file.documents.len(),
        documents_path.display()
    );

    let engine = SignalEngine::from_settings(&settings)?;
    let cancel = Arc::new(AtomicBool::new(false));

    let summary = {
        let run = engine.process_batch(file.documents, cancel.clone());
        tokio::pin!(run);

        tokio::select! {
            summary = &mut run => summary,
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Cancelling, waiting for in-flight documents...");
                cancel.store(true, Ordering::SeqCst);
                run.await
            }
        }
    };

    let stats = engine.ledger().stats().await?;
    info!(
        "Ledger holds {} signals, {} evidence rows, {} audit entries",
        stats.total_signals, stats.total_evidence, stats.total_audit_entries
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    engine.shutdown().await;
    Ok(())
}
