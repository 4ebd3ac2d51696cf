//! Rendering a whole chapter into one bilingual WAV file.

use crate::audio::wav::write_wav;
use crate::cancellation::CancellationToken;
use crate::error::{ReaderError, ReaderResult};
use crate::gateway::SpeechSynthesizer;
use crate::model::{Phase, PlaybackPosition};
use crate::store::{RetryPolicy, SentenceStore};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub retry: RetryPolicy,
    pub progress_log_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub sentences: usize,
    pub clips: usize,
    pub sample_rate: u32,
    pub duration: Duration,
}

/// Synthesize every sentence (source, then target) in order and write the
/// concatenation to `out`.
///
/// Cached audio is reused and fresh audio is added to the cache. Any failure
/// aborts the export and no file is left at `out`.
pub async fn export_chapter(
    store: &SentenceStore,
    synthesizer: &dyn SpeechSynthesizer,
    out: &Path,
    cancel: &CancellationToken,
    options: ExportOptions,
) -> ReaderResult<ExportSummary> {
    let total = store.len() * Phase::BOTH.len();
    info!(
        document_id = store.document_id(),
        sentences = store.len(),
        path = %out.display(),
        "Starting chapter export"
    );

    let started = Instant::now();
    let mut last_progress_log = started;
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: Option<u32> = None;
    let mut clips = 0usize;

    for index in 0..store.len() {
        for phase in Phase::BOTH {
            cancel.check_cancelled("export")?;
            let position = PlaybackPosition::new(index, phase);
            let clip = store
                .fetch_audio(synthesizer, position, options.retry)
                .await
                .map_err(|err| {
                    warn!(%position, "Export aborted: {err}");
                    ReaderError::Export(err.to_string())
                })?;

            match sample_rate {
                None => sample_rate = Some(clip.sample_rate()),
                Some(rate) if rate != clip.sample_rate() => {
                    return Err(ReaderError::Export(format!(
                        "sentence {index} ({phase}) is {} Hz but earlier audio is {rate} Hz",
                        clip.sample_rate()
                    )));
                }
                Some(_) => {}
            }
            samples.extend_from_slice(clip.samples());
            clips += 1;

            if last_progress_log.elapsed() >= options.progress_log_interval {
                info!(done = clips, total, "Export progress");
                last_progress_log = Instant::now();
            } else {
                debug!(done = clips, total, "Export progress");
            }
        }
    }

    cancel.check_cancelled("export_write")?;
    let sample_rate = sample_rate
        .ok_or_else(|| ReaderError::Export("chapter produced no audio".to_string()))?;
    let sample_count = samples.len();
    let path = out.to_path_buf();
    let write_path = path.clone();
    tokio::task::spawn_blocking(move || write_wav(&write_path, sample_rate, &samples))
        .await
        .map_err(|err| ReaderError::Export(format!("writer task failed: {err}")))?
        .map_err(|err| ReaderError::Export(format!("{err:#}")))?;

    let duration = Duration::from_secs_f64(sample_count as f64 / sample_rate as f64);
    info!(
        path = %path.display(),
        clips,
        audio_secs = duration.as_secs_f64(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Finished chapter export"
    );
    Ok(ExportSummary {
        path,
        sentences: store.len(),
        clips,
        sample_rate,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AudioCache;
    use crate::testing::{ScriptedSynthesizer, TEST_SAMPLE_RATE, sample_book, target_text};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("lingoflow_test_{name}_{nanos}.wav"))
    }

    fn store(len: usize) -> SentenceStore {
        SentenceStore::from_book(&sample_book("export", len), 0, AudioCache::new()).expect("store")
    }

    #[tokio::test]
    async fn writes_every_phase_in_order() {
        let store = store(3);
        let synth = ScriptedSynthesizer::new();
        let out = unique_temp_file("export_ok");

        let summary = export_chapter(
            &store,
            &synth,
            &out,
            &CancellationToken::new(),
            ExportOptions::default(),
        )
        .await
        .expect("export");

        let reader = hound::WavReader::open(&out).expect("open wav");
        let spec = reader.spec();
        let frames = reader.len();
        let _ = std::fs::remove_file(&out);

        assert_eq!(summary.clips, 6);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TEST_SAMPLE_RATE);
        assert_eq!(frames as usize, 6 * 500);
        assert_eq!(store.cache().len(), 6);
    }

    #[tokio::test]
    async fn failure_leaves_no_file() {
        let store = store(2);
        let synth = ScriptedSynthesizer::new();
        synth.fail_always(&target_text(1));
        let out = unique_temp_file("export_fail");

        let err = export_chapter(
            &store,
            &synth,
            &out,
            &CancellationToken::new(),
            ExportOptions::default(),
        )
        .await
        .expect_err("export should fail");

        assert!(matches!(err, ReaderError::Export(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn cancelled_export_stops_before_synthesis() {
        let store = store(2);
        let synth = ScriptedSynthesizer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = unique_temp_file("export_cancel");

        let err = export_chapter(&store, &synth, &out, &cancel, ExportOptions::default())
            .await
            .expect_err("cancelled");

        assert!(matches!(err, ReaderError::Cancelled("export")));
        assert_eq!(synth.total_calls(), 0);
        assert!(!out.exists());
    }
}
