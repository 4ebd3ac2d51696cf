use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Write mono 16-bit PCM. The file appears at `path` only once it is complete.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating export directory {}", parent.display()))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let temp_path = unique_temp_wav_path(path);
    let written = write_samples(&temp_path, spec, samples);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if fs::rename(&temp_path, path).is_err() {
        let copied = fs::copy(&temp_path, path);
        let _ = fs::remove_file(&temp_path);
        copied.with_context(|| format!("Moving WAV into place at {}", path.display()))?;
    }
    Ok(())
}

fn write_samples(temp_path: &Path, spec: WavSpec, samples: &[f32]) -> Result<()> {
    let mut writer = hound::WavWriter::create(temp_path, spec)
        .with_context(|| format!("Creating {}", temp_path.display()))?;
    for &s in samples {
        writer.write_sample(to_pcm16(s))?;
    }
    writer.finalize().context("Finalizing WAV header")?;
    Ok(())
}

fn to_pcm16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn unique_temp_wav_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export.wav".to_string());
    path.with_file_name(format!(".{file_name}.{ts_nanos}.{nonce}.part"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("lingoflow_test_{name}_{nanos}.wav"))
    }

    #[test]
    fn writes_readable_mono_pcm16() {
        let path = unique_temp_file("wav");
        write_wav(&path, 24_000, &[0.0, 0.5, -0.5, 2.0]).expect("write wav");

        let mut reader = hound::WavReader::open(&path).expect("open wav");
        let spec = reader.spec();
        let samples = reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .expect("read samples");
        let _ = fs::remove_file(&path);

        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(samples, vec![0, 16_383, -16_383, i16::MAX]);
    }

    #[test]
    fn leaves_no_temp_file_behind() {
        let dir = std::env::temp_dir().join(format!(
            "lingoflow_wav_dir_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be after epoch")
                .as_nanos()
        ));
        let path = dir.join("out.wav");
        write_wav(&path, 16_000, &[0.1; 32]).expect("write wav");

        let entries = fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let _ = fs::remove_dir_all(&dir);

        assert_eq!(entries, vec!["out.wav".to_string()]);
    }
}
