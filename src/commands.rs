//! Non-interactive subcommands: ingest, list, remove and export.

use anyhow::{Context, Result, anyhow};
use lingoflow_core::audio::ClockOutput;
use lingoflow_core::cache::AudioCache;
use lingoflow_core::cancellation::CancellationToken;
use lingoflow_core::config::AppConfig;
use lingoflow_core::engine::{EngineOptions, PlaybackEngine};
use lingoflow_core::export::{ExportOptions, export_chapter};
use lingoflow_core::gateway::{Collaborators, GeminiClient};
use lingoflow_core::ingest::{IngestRequest, load_source_text};
use lingoflow_core::library::Library;
use lingoflow_core::model::Book;
use lingoflow_core::store::SentenceStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn ingest(
    config: &AppConfig,
    library: Library,
    collaborators: Collaborators,
    path: &Path,
    from: &str,
    to: &str,
    title: Option<String>,
) -> Result<()> {
    let text = load_source_text(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut request = IngestRequest::new(text, from, to);
    if let Some(title) = title {
        request = request.with_title(title);
    }

    let (engine, handle) = PlaybackEngine::new(
        library,
        collaborators,
        Box::new(ClockOutput::new()),
        EngineOptions::from_config(config),
    );
    let engine_task = tokio::spawn(engine.run());
    let outcome = handle.load_document(request).await;
    let _ = handle.shutdown();
    engine_task.await.context("Engine task failed")?;

    let book = outcome?;
    println!("{}", describe_book(&book));
    Ok(())
}

pub fn list(library: &Library) {
    if library.is_empty() {
        println!("Library is empty.");
        return;
    }
    for book in library.books() {
        println!("{}", describe_book(book));
    }
}

pub fn remove(mut library: Library, id: &str) -> Result<()> {
    let book = library.remove(id)?;
    library.save()?;
    info!(id, "Removed document");
    println!("Removed {} ({})", book.id, book.title);
    Ok(())
}

pub async fn export(config: &AppConfig, library: &Library, id: &str, out: &Path) -> Result<()> {
    let book = library
        .get(id)
        .ok_or_else(|| anyhow!("No document with id {id}; run `lingoflow list`"))?;
    let store = SentenceStore::from_book(book, 0, AudioCache::new())?;
    let client = Arc::new(GeminiClient::from_config(config)?);

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C; cancelling export");
        ctrlc_cancel.cancel();
    }) {
        warn!("Failed to install Ctrl+C signal handler: {err}");
    }

    let options = ExportOptions {
        retry: EngineOptions::from_config(config).retry,
        progress_log_interval: config.export_progress_log_interval(),
    };
    let summary = export_chapter(&store, client.as_ref(), out, &cancel, options).await?;
    println!(
        "Wrote {} ({} clips, {:.1}s at {} Hz)",
        summary.path.display(),
        summary.clips,
        summary.duration.as_secs_f32(),
        summary.sample_rate
    );
    Ok(())
}

pub fn describe_book(book: &Book) -> String {
    format!(
        "{}  {}  [{} -> {}]  {} sentences",
        book.id,
        book.title,
        book.source_lang,
        book.target_lang,
        book.sentence_count()
    )
}
