//! Turning raw text into a [`Book`] of aligned sentence pairs.

use crate::error::{ReaderError, ReaderResult};
use crate::gateway::Translator;
use crate::model::{Book, Chapter, Sentence, SentencePair};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

const TITLE_PREFIX_CHARS: usize = 30;
const BOOK_ID_HEX_CHARS: usize = 16;
pub const DEFAULT_CHAPTER_ID: &str = "1";
pub const DEFAULT_CHAPTER_TITLE: &str = "Chapter 1";

static RE_HORIZONTAL_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub title: Option<String>,
}

impl IngestRequest {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Clone)]
pub struct Ingestor {
    translator: Arc<dyn Translator>,
}

impl Ingestor {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }

    pub async fn ingest(&self, request: &IngestRequest) -> ReaderResult<Book> {
        self.ingest_at(request, now_millis()).await
    }

    /// Ingest with an explicit creation time in unix milliseconds.
    pub async fn ingest_at(&self, request: &IngestRequest, created_at: u64) -> ReaderResult<Book> {
        let source_lang = language_tag(&request.source_lang, "source")?;
        let target_lang = language_tag(&request.target_lang, "target")?;
        let text = normalize_source_text(&request.text);
        if text.is_empty() {
            return Err(ReaderError::Ingestion("input text is empty".to_string()));
        }

        info!(
            chars = text.chars().count(),
            source_lang, target_lang, "Segmenting and translating document"
        );
        let pairs = self
            .translator
            .segment_and_translate(&text, &source_lang, &target_lang)
            .await
            .map_err(|err| {
                warn!("Translation request failed: {err:#}");
                ReaderError::Ingestion(format!("{err:#}"))
            })?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_title(&text));
        let book = build_book(title, source_lang, target_lang, &text, pairs, created_at)?;
        info!(
            book_id = %book.id,
            sentences = book.sentence_count(),
            "Ingested document"
        );
        Ok(book)
    }
}

/// NFC-normalize, unify line endings, collapse runs of horizontal whitespace and trim.
pub fn normalize_source_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let composed = unified.nfc().collect::<String>();
    RE_HORIZONTAL_WS
        .replace_all(&composed, " ")
        .trim()
        .to_string()
}

/// First 30 characters of the text followed by an ellipsis.
pub fn default_title(text: &str) -> String {
    let prefix = text
        .chars()
        .take(TITLE_PREFIX_CHARS)
        .collect::<String>()
        .replace('\n', " ");
    format!("{}...", prefix.trim_end())
}

pub fn book_id(title: &str, created_at: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(created_at.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..BOOK_ID_HEX_CHARS].to_string()
}

/// Map translator output 1:1 onto sentences. No partial results.
pub fn build_book(
    title: String,
    source_lang: String,
    target_lang: String,
    text: &str,
    pairs: Vec<SentencePair>,
    created_at: u64,
) -> ReaderResult<Book> {
    if pairs.is_empty() {
        return Err(ReaderError::Ingestion(
            "translator returned no sentences".to_string(),
        ));
    }
    let mut sentences = Vec::with_capacity(pairs.len());
    for (id, pair) in pairs.into_iter().enumerate() {
        let source_text = pair.source.trim().to_string();
        let target_text = pair.target.trim().to_string();
        if source_text.is_empty() && target_text.is_empty() {
            return Err(ReaderError::Ingestion(format!(
                "translator returned a blank pair at position {id}"
            )));
        }
        sentences.push(Sentence {
            id,
            source_text,
            target_text,
        });
    }

    Ok(Book {
        id: book_id(&title, created_at, text),
        title,
        source_lang,
        target_lang,
        created_at,
        chapters: vec![Chapter {
            id: DEFAULT_CHAPTER_ID.to_string(),
            title: DEFAULT_CHAPTER_TITLE.to_string(),
            sentences,
        }],
    })
}

/// Read a UTF-8 source file. PDF input is not supported.
pub fn load_source_text(path: &Path) -> ReaderResult<String> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if is_pdf {
        return Err(ReaderError::InvalidInput(format!(
            "{} is a PDF; extract its text to a .txt file first",
            path.display()
        )));
    }
    std::fs::read_to_string(path).map_err(|err| {
        ReaderError::InvalidInput(format!("reading {}: {err}", path.display()))
    })
}

fn language_tag(tag: &str, role: &str) -> ReaderResult<String> {
    let tag = tag.trim().to_ascii_lowercase();
    if tag.is_empty() {
        return Err(ReaderError::InvalidInput(format!(
            "{role} language tag is empty"
        )));
    }
    Ok(tag)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
