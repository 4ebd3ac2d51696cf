//! Timer-driven output for headless runs.
//!
//! Nothing is rendered; a clip "plays" for exactly its duration at the current
//! rate and then reports completion. Uses the tokio clock, so paused-time tests
//! can step through a whole chapter deterministically.

use super::{AudioClip, AudioOutput, OnFinished};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

type SharedCallback = Arc<Mutex<Option<OnFinished>>>;

struct ActiveClip {
    callback: SharedCallback,
    timer: JoinHandle<()>,
    deadline: Instant,
}

pub struct ClockOutput {
    rate: f32,
    active: Option<ActiveClip>,
}

impl Default for ClockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockOutput {
    pub fn new() -> Self {
        Self {
            rate: 1.0,
            active: None,
        }
    }

    fn arm(deadline: Instant, callback: SharedCallback) -> Result<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current()
            .context("Clock output requires a tokio runtime")?;
        Ok(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let finished = callback.lock().ok().and_then(|mut slot| slot.take());
            if let Some(finished) = finished {
                finished();
            }
        }))
    }
}

impl AudioOutput for ClockOutput {
    fn play(&mut self, clip: AudioClip, rate: f32, on_finished: OnFinished) -> Result<()> {
        self.stop();
        self.rate = rate;
        let deadline = Instant::now() + clip.duration_at_rate(rate);
        let callback: SharedCallback = Arc::new(Mutex::new(Some(on_finished)));
        let timer = Self::arm(deadline, Arc::clone(&callback))?;
        trace!(?clip, rate, "Clock output started clip");
        self.active = Some(ActiveClip {
            callback,
            timer,
            deadline,
        });
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        let previous = self.rate;
        self.rate = rate;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.timer.is_finished() || !(rate > 0.0) {
            return;
        }
        let now = Instant::now();
        let remaining = active.deadline.saturating_duration_since(now);
        let rescaled = remaining.mul_f64(previous as f64 / rate as f64);
        active.timer.abort();
        active.deadline = now + rescaled;
        match Self::arm(active.deadline, Arc::clone(&active.callback)) {
            Ok(timer) => active.timer = timer,
            Err(_) => self.active = None,
        }
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            // Detach first: a timer racing with abort finds an empty slot.
            if let Ok(mut slot) = active.callback.lock() {
                slot.take();
            }
            active.timer.abort();
        }
    }
}

impl Drop for ClockOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
