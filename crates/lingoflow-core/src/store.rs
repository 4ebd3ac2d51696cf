//! The active chapter as the engine sees it.

use crate::audio::AudioClip;
use crate::cache::{AudioCache, AudioKey};
use crate::error::{ReaderError, ReaderResult};
use crate::gateway::SpeechSynthesizer;
use crate::model::{Book, Phase, PlaybackPosition, Sentence};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times a failed synthesis is retried before the phase is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

/// Ordered sentence pairs of one chapter plus a view onto the audio cache.
///
/// Cheap to clone; spawned fetch tasks carry their own copy.
#[derive(Clone)]
pub struct SentenceStore {
    document_id: Arc<str>,
    chapter_id: Arc<str>,
    title: Arc<str>,
    source_lang: Arc<str>,
    target_lang: Arc<str>,
    sentences: Arc<[Sentence]>,
    cache: AudioCache,
}

impl SentenceStore {
    pub fn from_book(book: &Book, chapter_index: usize, cache: AudioCache) -> ReaderResult<Self> {
        let chapter = book.chapters.get(chapter_index).ok_or_else(|| {
            ReaderError::InvalidInput(format!(
                "document {} has no chapter {chapter_index}",
                book.id
            ))
        })?;
        if chapter.sentences.is_empty() {
            return Err(ReaderError::InvalidInput(format!(
                "chapter {} of document {} has no sentences",
                chapter.id, book.id
            )));
        }
        Ok(Self {
            document_id: Arc::from(book.id.as_str()),
            chapter_id: Arc::from(chapter.id.as_str()),
            title: Arc::from(book.title.as_str()),
            source_lang: Arc::from(book.source_lang.as_str()),
            target_lang: Arc::from(book.target_lang.as_str()),
            sentences: chapter.sentences.clone().into(),
            cache,
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentence(&self, index: usize) -> Option<&Sentence> {
        self.sentences.get(index)
    }

    pub fn language(&self, phase: Phase) -> &str {
        match phase {
            Phase::Source => &self.source_lang,
            Phase::Target => &self.target_lang,
        }
    }

    pub fn text(&self, position: PlaybackPosition) -> Option<&str> {
        self.sentence(position.index)
            .map(|sentence| sentence.text(position.phase))
    }

    pub fn key(&self, position: PlaybackPosition) -> AudioKey {
        AudioKey {
            document_id: Arc::clone(&self.document_id),
            chapter_id: Arc::clone(&self.chapter_id),
            sentence: position.index,
            phase: position.phase,
        }
    }

    pub fn cached(&self, position: PlaybackPosition) -> Option<AudioClip> {
        self.cache.get(&self.key(position))
    }

    pub fn is_cached(&self, position: PlaybackPosition) -> bool {
        self.cache.contains(&self.key(position))
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Return audio for a phase, synthesizing it through the cache if needed.
    ///
    /// Concurrent callers for the same phase share one synthesis request.
    pub async fn fetch_audio(
        &self,
        synthesizer: &dyn SpeechSynthesizer,
        position: PlaybackPosition,
        retry: RetryPolicy,
    ) -> ReaderResult<AudioClip> {
        let text = self
            .text(position)
            .ok_or_else(|| {
                ReaderError::InvalidInput(format!("sentence {} out of range", position.index))
            })?
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(ReaderError::Synthesis {
                sentence: position.index,
                phase: position.phase,
                message: "sentence text is empty".to_string(),
            });
        }
        let language = self.language(position.phase).to_string();
        let key = self.key(position);

        self.cache
            .fetch(&key, || {
                let text = text.clone();
                let language = language.clone();
                async move {
                    let mut attempt = 0u32;
                    loop {
                        match synthesizer.synthesize(&text, &language).await {
                            Ok(clip) => {
                                debug!(
                                    %position,
                                    attempt,
                                    samples = clip.len(),
                                    "Synthesized phase"
                                );
                                return Ok(clip);
                            }
                            Err(err) if attempt < retry.retries => {
                                attempt += 1;
                                warn!(%position, attempt, "Synthesis failed, retrying: {err:#}");
                                tokio::time::sleep(retry.backoff).await;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            })
            .await
            .map_err(|err| ReaderError::Synthesis {
                sentence: position.index,
                phase: position.phase,
                message: format!("{err:#}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSynthesizer, sample_book};

    fn store(len: usize) -> SentenceStore {
        SentenceStore::from_book(&sample_book("doc", len), 0, AudioCache::new()).expect("store")
    }

    #[test]
    fn empty_chapter_is_rejected() {
        let book = sample_book("doc", 0);
        assert!(SentenceStore::from_book(&book, 0, AudioCache::new()).is_err());
        assert!(SentenceStore::from_book(&book, 3, AudioCache::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_reuses_cached_audio() {
        let store = store(2);
        let synth = ScriptedSynthesizer::new();
        let pos = PlaybackPosition::new(1, Phase::Target);

        store
            .fetch_audio(&synth, pos, RetryPolicy::default())
            .await
            .expect("first fetch");
        store
            .fetch_audio(&synth, pos, RetryPolicy::default())
            .await
            .expect("second fetch");

        assert_eq!(synth.calls_for(store.text(pos).expect("text")), 1);
        assert!(store.is_cached(pos));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_before_reporting_failure() {
        let store = store(1);
        let synth = ScriptedSynthesizer::new();
        let pos = PlaybackPosition::source(0);
        synth.fail_times(store.text(pos).expect("text"), 2);

        let retry = RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(10),
        };
        let err = store
            .fetch_audio(&synth, pos, retry)
            .await
            .expect_err("two failures exceed one retry");
        assert!(matches!(err, ReaderError::Synthesis { sentence: 0, .. }));

        let clip = store.fetch_audio(&synth, pos, retry).await;
        assert!(clip.is_ok());
        assert_eq!(synth.total_calls(), 3);
    }
}
