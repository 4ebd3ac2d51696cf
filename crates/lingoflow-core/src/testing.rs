//! Scripted collaborators shared by unit tests.

use crate::audio::AudioClip;
use crate::gateway::{Collaborators, Lexicon, SpeechSynthesizer, Translator};
use crate::model::{Book, Chapter, Definition, Sentence, SentencePair};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_SAMPLE_RATE: u32 = 1_000;

#[derive(Default)]
struct SynthState {
    calls: HashMap<String, usize>,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
    fail_always: HashSet<String>,
    fail_remaining: HashMap<String, u32>,
}

/// Synthesizer whose latency, clip length and failures are set per test.
pub struct ScriptedSynthesizer {
    latency: Duration,
    clip_samples: usize,
    state: Mutex<SynthState>,
}

impl ScriptedSynthesizer {
    /// Instant responses, half-second clips.
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            clip_samples: 500,
            state: Mutex::new(SynthState::default()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_clip_duration(mut self, duration: Duration) -> Self {
        self.clip_samples = (duration.as_secs_f64() * TEST_SAMPLE_RATE as f64) as usize;
        self
    }

    pub fn fail_always(&self, text: &str) {
        self.lock().fail_always.insert(text.to_string());
    }

    pub fn fail_times(&self, text: &str, times: u32) {
        self.lock().fail_remaining.insert(text.to_string(), times);
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.lock().calls.get(text).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Highest number of simultaneous requests seen for any single text.
    pub fn max_in_flight_per_text(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SynthState> {
        self.state.lock().expect("synth state")
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<AudioClip> {
        {
            let mut state = self.lock();
            *state.calls.entry(text.to_string()).or_default() += 1;
            let in_flight = state.in_flight.entry(text.to_string()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            state.max_in_flight = state.max_in_flight.max(current);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        if let Some(count) = state.in_flight.get_mut(text) {
            *count -= 1;
        }
        if state.fail_always.contains(text) {
            return Err(anyhow!("scripted failure for '{text}'"));
        }
        if let Some(remaining) = state.fail_remaining.get_mut(text) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("scripted transient failure for '{text}'"));
            }
        }
        Ok(AudioClip::new(vec![0.25; self.clip_samples], TEST_SAMPLE_RATE))
    }
}

/// Translator returning a fixed response after an optional delay.
pub struct ScriptedTranslator {
    pub response: std::result::Result<Vec<SentencePair>, String>,
    pub latency: Duration,
}

impl ScriptedTranslator {
    pub fn pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            response: Ok(pairs
                .iter()
                .map(|(source, target)| SentencePair {
                    source: source.to_string(),
                    target: target.to_string(),
                })
                .collect()),
            latency: Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            latency: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn segment_and_translate(
        &self,
        _text: &str,
        _source_language: &str,
        _target_language: &str,
    ) -> Result<Vec<SentencePair>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.response.clone().map_err(|message| anyhow!(message))
    }
}

/// Lexicon that defines every word the same way, unless told to fail.
pub struct ScriptedLexicon {
    pub fail: bool,
}

#[async_trait]
impl Lexicon for ScriptedLexicon {
    async fn define(
        &self,
        word: &str,
        _context: &str,
        target_language: &str,
    ) -> Result<Definition> {
        if self.fail {
            return Err(anyhow!("lexicon unavailable"));
        }
        Ok(Definition {
            word: word.to_string(),
            definition: format!("meaning of {word} in {target_language}"),
            example: None,
        })
    }
}

pub fn collaborators(
    synthesizer: Arc<ScriptedSynthesizer>,
    translator: ScriptedTranslator,
    lexicon: ScriptedLexicon,
) -> Collaborators {
    Collaborators {
        synthesizer,
        translator: Arc::new(translator),
        lexicon: Arc::new(lexicon),
    }
}

pub fn source_text(index: usize) -> String {
    format!("Source sentence {index}.")
}

pub fn target_text(index: usize) -> String {
    format!("Target sentence {index}.")
}

/// A one-chapter book with `len` numbered sentence pairs.
pub fn sample_book(id: &str, len: usize) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Book {id}"),
        source_lang: "en".to_string(),
        target_lang: "fa".to_string(),
        created_at: 1_700_000_000_000,
        chapters: vec![Chapter {
            id: "1".to_string(),
            title: "Chapter 1".to_string(),
            sentences: (0..len)
                .map(|i| Sentence {
                    id: i,
                    source_text: source_text(i),
                    target_text: target_text(i),
                })
                .collect(),
        }],
    }
}
