//! Keyed audio cache shared by the playback path, the prefetcher and export.
//!
//! Entries are write-once: the first successful synthesis for a key wins and
//! is never replaced. Fetches are single-flight per key, so a caller asking for
//! a key that is already being synthesized waits on that request instead of
//! issuing its own. Only successes are shared: a waiter whose leader fails
//! makes its own attempt.
//!
//! Evicting a document is permanent for the life of the cache. Synthesis that
//! was still running for it completes for its callers but is never stored.

use crate::audio::AudioClip;
use crate::model::Phase;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioKey {
    pub document_id: Arc<str>,
    pub chapter_id: Arc<str>,
    pub sentence: usize,
    pub phase: Phase,
}

impl fmt::Display for AudioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.document_id, self.chapter_id, self.sentence, self.phase
        )
    }
}

#[derive(Default)]
struct CacheInner {
    clips: HashMap<AudioKey, AudioClip>,
    in_flight: HashMap<AudioKey, Vec<oneshot::Sender<AudioClip>>>,
    evicted: HashSet<Arc<str>>,
}

impl CacheInner {
    /// Write-once insert. Returns the clip now held for `key`, or `None` when
    /// the key's document has been evicted.
    fn store(&mut self, key: &AudioKey, clip: AudioClip) -> Option<AudioClip> {
        if self.evicted.contains(&key.document_id) {
            return None;
        }
        Some(self.clips.entry(key.clone()).or_insert(clip).clone())
    }
}

#[derive(Clone, Default)]
pub struct AudioCache {
    inner: Arc<Mutex<CacheInner>>,
}

enum Claim {
    Cached(AudioClip),
    Wait(oneshot::Receiver<AudioClip>),
    Lead,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &AudioKey) -> Option<AudioClip> {
        self.lock().clips.get(key).cloned()
    }

    pub fn contains(&self, key: &AudioKey) -> bool {
        self.lock().clips.contains_key(key)
    }

    pub fn is_in_flight(&self, key: &AudioKey) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    /// Store `clip` unless the key already holds audio or its document was
    /// evicted. Returns whether it was stored.
    pub fn insert_if_absent(&self, key: AudioKey, clip: AudioClip) -> bool {
        let mut inner = self.lock();
        if inner.clips.contains_key(&key) {
            return false;
        }
        inner.store(&key, clip).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clips.is_empty()
    }

    /// Drop every clip belonging to a document and refuse any later ones.
    /// Returns the number removed.
    pub fn evict_document(&self, document_id: &str) -> usize {
        let mut inner = self.lock();
        inner.evicted.insert(Arc::from(document_id));
        let before = inner.clips.len();
        inner
            .clips
            .retain(|key, _| key.document_id.as_ref() != document_id);
        let removed = before - inner.clips.len();
        if removed > 0 {
            debug!(document_id, removed, "Evicted cached audio");
        }
        removed
    }

    /// Return the cached clip for `key`, or run `synthesize` to produce it.
    ///
    /// At most one `synthesize` future runs per key at a time. If the leading
    /// request fails or is dropped, the waiters claim the key again and one of
    /// them runs its own `synthesize`.
    pub async fn fetch<F, Fut>(&self, key: &AudioKey, mut synthesize: F) -> Result<AudioClip>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AudioClip>>,
    {
        loop {
            match self.claim(key) {
                Claim::Cached(clip) => return Ok(clip),
                Claim::Wait(rx) => match rx.await {
                    Ok(clip) => return Ok(clip),
                    Err(_) => {
                        trace!(%key, "In-flight fetch failed or was abandoned; claiming again");
                        continue;
                    }
                },
                Claim::Lead => {
                    let guard = FlightGuard {
                        cache: self,
                        key,
                        armed: true,
                    };
                    let result = synthesize().await;
                    return guard.complete(result);
                }
            }
        }
    }

    fn claim(&self, key: &AudioKey) -> Claim {
        let mut inner = self.lock();
        if let Some(clip) = inner.clips.get(key) {
            return Claim::Cached(clip.clone());
        }
        if let Some(waiters) = inner.in_flight.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            trace!(%key, "Attached to in-flight fetch");
            return Claim::Wait(rx);
        }
        inner.in_flight.insert(key.clone(), Vec::new());
        Claim::Lead
    }
}

/// Clears the in-flight marker for a key even if the leading future is dropped.
/// Dropping the waiters' senders wakes them so one can take over.
struct FlightGuard<'a> {
    cache: &'a AudioCache,
    key: &'a AudioKey,
    armed: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, result: Result<AudioClip>) -> Result<AudioClip> {
        self.armed = false;
        let mut inner = self.cache.lock();
        let waiters = inner.in_flight.remove(self.key).unwrap_or_default();
        let clip = match result {
            Ok(clip) => match inner.store(self.key, clip.clone()) {
                Some(stored) => stored,
                None => {
                    debug!(key = %self.key, "Discarding audio for evicted document");
                    clip
                }
            },
            Err(err) => return Err(err),
        };
        drop(inner);

        for waiter in waiters {
            let _ = waiter.send(clip.clone());
        }
        Ok(clip)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.lock().in_flight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(doc: &str, sentence: usize, phase: Phase) -> AudioKey {
        AudioKey {
            document_id: Arc::from(doc),
            chapter_id: Arc::from("1"),
            sentence,
            phase,
        }
    }

    fn clip(value: f32) -> AudioClip {
        AudioClip::new(vec![value; 4], 24_000)
    }

    #[test]
    fn insert_is_write_once() {
        let cache = AudioCache::new();
        let k = key("doc", 0, Phase::Source);
        assert!(cache.insert_if_absent(k.clone(), clip(0.1)));
        assert!(!cache.insert_if_absent(k.clone(), clip(0.9)));
        assert_eq!(cache.get(&k), Some(clip(0.1)));
    }

    #[test]
    fn eviction_is_scoped_to_document() {
        let cache = AudioCache::new();
        cache.insert_if_absent(key("a", 0, Phase::Source), clip(0.1));
        cache.insert_if_absent(key("a", 0, Phase::Target), clip(0.1));
        cache.insert_if_absent(key("b", 0, Phase::Source), clip(0.1));

        assert_eq!(cache.evict_document("a"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key("b", 0, Phase::Source)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_request() {
        let cache = AudioCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("doc", 3, Phase::Target);

        let fetch = |cache: AudioCache, calls: Arc<AtomicUsize>, k: AudioKey| async move {
            cache
                .fetch(&k, || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(clip(0.5))
                    }
                })
                .await
        };
        let first = tokio::spawn(fetch(cache.clone(), Arc::clone(&calls), k.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_in_flight(&k));
        let second = tokio::spawn(fetch(cache.clone(), Arc::clone(&calls), k.clone()));

        let a = first.await.expect("join").expect("fetch");
        let b = second.await.expect("join").expect("fetch");
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_in_flight(&k));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_makes_own_attempt_after_leader_fails() {
        let cache = AudioCache::new();
        let k = key("doc", 0, Phase::Source);
        let waiter_cache = cache.clone();
        let waiter_key = k.clone();

        let leader = tokio::spawn({
            let cache = cache.clone();
            let k = k.clone();
            async move {
                cache
                    .fetch(&k, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(anyhow!("quota exceeded"))
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = tokio::spawn(async move {
            waiter_cache
                .fetch(&waiter_key, || async { Ok(clip(0.2)) })
                .await
        });

        let err = leader.await.expect("join").expect_err("leader fails");
        assert!(err.to_string().contains("quota exceeded"));
        let clip = waiter.await.expect("join").expect("own attempt");
        assert_eq!(clip.samples()[0], 0.2);
        assert_eq!(cache.get(&k), Some(clip));
        assert!(!cache.is_in_flight(&k));
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_document_rejects_late_audio() {
        let cache = AudioCache::new();
        let k = key("gone", 0, Phase::Source);
        let running = tokio::spawn({
            let cache = cache.clone();
            let k = k.clone();
            async move {
                cache
                    .fetch(&k, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(clip(0.4))
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.evict_document("gone"), 0);

        let delivered = running.await.expect("join").expect("fetch");
        assert_eq!(delivered.samples()[0], 0.4);
        assert!(cache.is_empty());
        assert!(!cache.insert_if_absent(key("gone", 1, Phase::Target), clip(0.1)));
        assert!(cache.insert_if_absent(key("kept", 0, Phase::Source), clip(0.1)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_leader_hands_over_to_waiter() {
        let cache = AudioCache::new();
        let k = key("doc", 1, Phase::Source);

        let leader = tokio::spawn({
            let cache = cache.clone();
            let k = k.clone();
            async move {
                cache
                    .fetch(&k, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(clip(0.3))
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = tokio::spawn({
            let cache = cache.clone();
            let k = k.clone();
            async move { cache.fetch(&k, || async { Ok(clip(0.7)) }).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        leader.abort();

        let clip = waiter.await.expect("join").expect("takeover fetch");
        assert_eq!(clip.samples()[0], 0.7);
        assert!(!cache.is_in_flight(&k));
    }
}
