use super::AudioClip;
use anyhow::Result;

/// Invoked once when a clip drains naturally. Never invoked after `stop`.
pub type OnFinished = Box<dyn FnOnce() + Send + 'static>;

/// A single playback stream owned by the engine.
///
/// Starting a clip replaces whatever was playing. `stop` must drop the pending
/// completion before silencing the stream so a clip being torn down cannot
/// report completion.
pub trait AudioOutput: Send {
    fn play(&mut self, clip: AudioClip, rate: f32, on_finished: OnFinished) -> Result<()>;

    /// Applies to the active clip, if any, and to later clips.
    fn set_rate(&mut self, rate: f32);

    fn stop(&mut self);
}
