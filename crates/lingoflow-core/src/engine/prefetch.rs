//! Background warming of the sentences after the one being played.

use crate::gateway::SpeechSynthesizer;
use crate::model::{Phase, PlaybackPosition};
use crate::store::{RetryPolicy, SentenceStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

type SentenceSlot = (Arc<str>, usize);

/// Fire-and-forget synthesis of upcoming sentences into the audio cache.
///
/// At most one warming task per sentence runs at a time. Failures are only
/// logged; the playback path fetches on its own when it gets there.
#[derive(Clone)]
pub struct Prefetcher {
    depth: usize,
    retry: RetryPolicy,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    in_flight: Arc<Mutex<HashSet<SentenceSlot>>>,
}

impl Prefetcher {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, depth: usize, retry: RetryPolicy) -> Self {
        Self {
            depth,
            retry,
            synthesizer,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start warming sentences `current + 1 ..= current + depth`. Returns how
    /// many tasks were spawned.
    pub fn warm(&self, store: &SentenceStore, current: usize) -> usize {
        if store.is_empty() {
            return 0;
        }
        let last = current.saturating_add(self.depth).min(store.len().saturating_sub(1));
        let mut spawned = 0;
        for index in current + 1..=last {
            let missing = Phase::BOTH
                .into_iter()
                .map(|phase| PlaybackPosition::new(index, phase))
                .filter(|position| !store.is_cached(*position))
                .collect::<Vec<_>>();
            if missing.is_empty() {
                continue;
            }
            let Some(slot) = self.claim(store, index) else {
                continue;
            };

            let store = store.clone();
            let synthesizer = Arc::clone(&self.synthesizer);
            let retry = self.retry;
            tokio::spawn(async move {
                let _slot = slot;
                for position in missing {
                    if let Err(err) = store
                        .fetch_audio(synthesizer.as_ref(), position, retry)
                        .await
                    {
                        debug!(%position, "Prefetch failed; playback will fetch inline: {err}");
                    }
                }
            });
            spawned += 1;
        }
        spawned
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .map(|slots| slots.len())
            .unwrap_or(0)
    }

    fn claim(&self, store: &SentenceStore, index: usize) -> Option<SlotGuard> {
        let slot: SentenceSlot = (Arc::from(store.document_id()), index);
        let mut slots = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !slots.insert(slot.clone()) {
            debug!(index, "Prefetch already in flight");
            return None;
        }
        Some(SlotGuard {
            slots: Arc::clone(&self.in_flight),
            slot,
        })
    }
}

/// Releases the sentence slot when the warming task ends or is dropped.
struct SlotGuard {
    slots: Arc<Mutex<HashSet<SentenceSlot>>>,
    slot: SentenceSlot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(&self.slot);
        }
    }
}
