use crate::lookup::LookupStatus;
use crate::model::{Phase, PlaybackPosition};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// A document is being segmented and translated.
    Processing,
    PlayingSource,
    PlayingTarget,
    Paused,
}

impl PlaybackState {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Source => Self::PlayingSource,
            Phase::Target => Self::PlayingTarget,
        }
    }

    pub fn is_playing(self) -> bool {
        matches!(self, Self::PlayingSource | Self::PlayingTarget)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::PlayingSource => "playing_source",
            Self::PlayingTarget => "playing_target",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transport state owned by the driver loop and mutated only by
/// [`super::transitions::transition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCore {
    pub state: PlaybackState,
    pub position: PlaybackPosition,
    /// Sentences in the loaded chapter; zero when nothing is loaded.
    pub len: usize,
    /// Bumped on every phase start and every interruption.
    pub generation: u64,
    /// Audio for the current phase is still being fetched.
    pub buffering: bool,
    pub phases_completed: u64,
}

impl EngineCore {
    pub fn has_chapter(&self) -> bool {
        self.len > 0
    }

    pub fn clamp_index(&self, index: isize) -> usize {
        let last = self.len.saturating_sub(1) as isize;
        index.clamp(0, last.max(0)) as usize
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }
}

/// Things that happened, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    PhaseStarted(PlaybackPosition),
    PhaseSkipped(PlaybackPosition),
    PhaseCompleted(PlaybackPosition),
    ChapterFinished,
    DocumentActivated { id: String, title: String },
    DocumentRemoved { id: String },
    IngestFailed { message: String },
}

/// What observers see after every processed event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub position: PlaybackPosition,
    pub len: usize,
    pub buffering: bool,
    pub rate: f32,
    pub lookup: LookupStatus,
    pub last_error: Option<String>,
    pub document_id: Option<String>,
    pub document_title: Option<String>,
    pub phases_completed: u64,
    /// Clips held in the audio cache across all documents.
    pub cached_clips: usize,
}

impl PlayerSnapshot {
    pub fn lookup_open(&self) -> bool {
        self.lookup.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_index_handles_empty_and_overflow() {
        let mut core = EngineCore::default();
        assert_eq!(core.clamp_index(4), 0);
        core.len = 3;
        assert_eq!(core.clamp_index(-1), 0);
        assert_eq!(core.clamp_index(7), 2);
    }

    #[test]
    fn playing_states_follow_phase() {
        assert_eq!(
            PlaybackState::for_phase(Phase::Target),
            PlaybackState::PlayingTarget
        );
        assert!(PlaybackState::PlayingSource.is_playing());
        assert!(!PlaybackState::Processing.is_playing());
    }
}
