//! Documents as they are persisted: books, chapters and sentence pairs.
//!
//! Audio never lives on these records. Decoded clips are held by
//! [`crate::cache::AudioCache`] keyed by document, chapter, sentence and phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two narrations of a sentence is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Source,
    Target,
}

impl Phase {
    pub const BOTH: [Phase; 2] = [Phase::Source, Phase::Target];

    pub fn label(self) -> &'static str {
        match self {
            Phase::Source => "source",
            Phase::Target => "target",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentence {
    pub id: usize,
    pub source_text: String,
    pub target_text: String,
}

impl Sentence {
    pub fn text(&self, phase: Phase) -> &str {
        match phase {
            Phase::Source => &self.source_text,
            Phase::Target => &self.target_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub sentences: Vec<Sentence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Unix milliseconds.
    pub created_at: u64,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn language(&self, phase: Phase) -> &str {
        match phase {
            Phase::Source => &self.source_lang,
            Phase::Target => &self.target_lang,
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.chapters.iter().map(|chapter| chapter.sentences.len()).sum()
    }
}

/// One aligned unit returned by the translation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentencePair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub word: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

/// Current sentence and phase. The index is kept within the loaded chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct PlaybackPosition {
    pub index: usize,
    pub phase: Phase,
}

impl PlaybackPosition {
    pub fn new(index: usize, phase: Phase) -> Self {
        Self { index, phase }
    }

    pub fn source(index: usize) -> Self {
        Self::new(index, Phase::Source)
    }
}

impl fmt::Display for PlaybackPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.phase)
    }
}
