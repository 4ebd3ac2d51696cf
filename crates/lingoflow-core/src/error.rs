use crate::model::Phase;
use thiserror::Error;

/// Failures surfaced by the reader core.
///
/// Synthesis errors never reach the user during playback; the engine turns
/// them into skipped phases. The other variants are returned to the caller.
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    #[error("ingestion failed: {0}")]
    Ingestion(String),
    #[error("speech synthesis failed for sentence {sentence} ({phase}): {message}")]
    Synthesis {
        sentence: usize,
        phase: Phase,
        message: String,
    },
    #[error("word lookup failed: {0}")]
    Lookup(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("library persistence failed: {0}")]
    Persistence(String),
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation cancelled at stage={0}")]
    Cancelled(&'static str),
    #[error("playback engine is not running")]
    EngineStopped,
}

pub type ReaderResult<T> = std::result::Result<T, ReaderError>;
