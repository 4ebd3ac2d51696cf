//! Decoded audio clips and the outputs that play them.

pub mod clock;
pub mod device;
pub mod output;
pub mod wav;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use clock::ClockOutput;
pub use device::RodioOutput;
pub use output::{AudioOutput, OnFinished};

/// Mono floating-point samples in `[-1, 1]` at a fixed sample rate.
///
/// Cloning is cheap; the samples are shared and never mutated.
#[derive(Clone, PartialEq)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Decode 16-bit little-endian linear PCM. A trailing odd byte is dropped.
    pub fn from_pcm16le(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect::<Vec<_>>();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Wall-clock length when played back at `rate`.
    pub fn duration_at_rate(&self, rate: f32) -> Duration {
        if !(rate.is_finite() && rate > 0.0) {
            return self.duration();
        }
        Duration::from_secs_f64(self.duration().as_secs_f64() / rate as f64)
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
