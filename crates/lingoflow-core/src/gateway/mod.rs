//! Remote collaborators: speech synthesis, translation and word definitions.
//!
//! The engine only sees these traits. [`gemini`] implements all three over the
//! Generative Language REST API; tests substitute scripted fakes.

pub mod gemini;

use crate::audio::AudioClip;
use crate::model::{Definition, SentencePair};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use gemini::GeminiClient;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` spoken in `language` into a mono clip.
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioClip>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Split `text` into sentences and translate each, preserving order.
    async fn segment_and_translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<SentencePair>>;
}

#[async_trait]
pub trait Lexicon: Send + Sync {
    async fn define(&self, word: &str, context: &str, target_language: &str)
    -> Result<Definition>;
}

/// The three services the engine depends on, shared across tasks.
#[derive(Clone)]
pub struct Collaborators {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub translator: Arc<dyn Translator>,
    pub lexicon: Arc<dyn Lexicon>,
}

impl Collaborators {
    /// Use one client for every role.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: SpeechSynthesizer + Translator + Lexicon + 'static,
    {
        Self {
            synthesizer: client.clone(),
            translator: client.clone(),
            lexicon: client,
        }
    }
}
