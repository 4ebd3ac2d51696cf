//! Pure transport state machine.
//!
//! `transition` updates [`EngineCore`] and returns the effects the driver must
//! perform. It never touches audio, the network or the clock, so every rule
//! about phase order, seeking and stale completions is testable in isolation.

use super::state::{EngineCore, EngineNotice, PlaybackState};
use crate::model::{Phase, PlaybackPosition};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Prev,
    Select(usize),
    /// Audio for the phase started under `generation` is cached.
    AudioReady {
        generation: u64,
        position: PlaybackPosition,
    },
    AudioFailed {
        generation: u64,
        position: PlaybackPosition,
    },
    OutputFinished {
        generation: u64,
    },
    IngestStarted,
    ChapterLoaded {
        len: usize,
    },
    IngestFailed,
    ChapterUnloaded,
    LookupStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StopOutput,
    FetchPhase {
        position: PlaybackPosition,
        generation: u64,
    },
    StartOutput {
        position: PlaybackPosition,
        generation: u64,
    },
    /// Warm the sentences after `index`.
    Prefetch {
        index: usize,
    },
    Notify(EngineNotice),
}

pub fn transition(core: &mut EngineCore, input: Input) -> Vec<Action> {
    if core.state == PlaybackState::Processing && !allowed_while_processing(input) {
        debug!(?input, "Ignoring transport input while processing");
        return Vec::new();
    }

    match input {
        Input::Play => on_play(core),
        Input::Pause | Input::LookupStarted => on_pause(core),
        Input::TogglePlayPause => {
            if core.state.is_playing() {
                on_pause(core)
            } else {
                on_play(core)
            }
        }
        Input::Next => on_step(core, 1),
        Input::Prev => on_step(core, -1),
        Input::Select(index) => on_select(core, index),
        Input::AudioReady {
            generation,
            position,
        } => on_audio_ready(core, generation, position),
        Input::AudioFailed {
            generation,
            position,
        } => on_audio_failed(core, generation, position),
        Input::OutputFinished { generation } => on_output_finished(core, generation),
        Input::IngestStarted => on_ingest_started(core),
        Input::ChapterLoaded { len } => on_chapter_loaded(core, len),
        Input::IngestFailed => on_ingest_failed(core),
        Input::ChapterUnloaded => on_chapter_unloaded(core),
    }
}

fn allowed_while_processing(input: Input) -> bool {
    matches!(
        input,
        Input::ChapterLoaded { .. } | Input::IngestFailed | Input::ChapterUnloaded
    )
}

fn on_play(core: &mut EngineCore) -> Vec<Action> {
    if !core.has_chapter() || core.state.is_playing() {
        return Vec::new();
    }
    // Resuming always restarts the sentence at its source phase.
    let position = PlaybackPosition::source(core.position.index);
    let mut actions = vec![Action::StopOutput];
    actions.extend(begin_phase(core, position));
    actions
}

fn on_pause(core: &mut EngineCore) -> Vec<Action> {
    if !core.state.is_playing() {
        return Vec::new();
    }
    interrupt(core);
    core.state = PlaybackState::Paused;
    debug!(position = %core.position, "Paused playback");
    vec![Action::StopOutput]
}

fn on_step(core: &mut EngineCore, delta: isize) -> Vec<Action> {
    if !core.has_chapter() {
        return Vec::new();
    }
    let was_playing = core.state.is_playing();
    let target = core.clamp_index(core.position.index as isize + delta);
    interrupt(core);

    let mut actions = vec![Action::StopOutput];
    if was_playing {
        actions.extend(begin_phase(core, PlaybackPosition::source(target)));
    } else {
        core.position = PlaybackPosition::source(target);
    }
    actions
}

fn on_select(core: &mut EngineCore, index: usize) -> Vec<Action> {
    if !core.has_chapter() {
        return Vec::new();
    }
    interrupt(core);
    let index = core.clamp_index(index.min(isize::MAX as usize) as isize);
    core.position = PlaybackPosition::source(index);
    core.state = PlaybackState::Paused;
    vec![Action::StopOutput]
}

fn on_audio_ready(
    core: &mut EngineCore,
    generation: u64,
    position: PlaybackPosition,
) -> Vec<Action> {
    if !accepts(core, generation, position) {
        return Vec::new();
    }
    core.buffering = false;
    vec![
        Action::StartOutput {
            position,
            generation,
        },
        Action::Notify(EngineNotice::PhaseStarted(position)),
    ]
}

fn on_audio_failed(
    core: &mut EngineCore,
    generation: u64,
    position: PlaybackPosition,
) -> Vec<Action> {
    if !accepts(core, generation, position) {
        return Vec::new();
    }
    let mut actions = vec![Action::Notify(EngineNotice::PhaseSkipped(position))];
    actions.extend(advance(core));
    actions
}

fn on_output_finished(core: &mut EngineCore, generation: u64) -> Vec<Action> {
    if !core.state.is_playing() || !core.is_current(generation) || core.buffering {
        debug!(
            generation,
            current = core.generation,
            "Ignoring stale output completion"
        );
        return Vec::new();
    }
    let mut actions = vec![Action::Notify(EngineNotice::PhaseCompleted(core.position))];
    actions.extend(advance(core));
    actions
}

fn on_ingest_started(core: &mut EngineCore) -> Vec<Action> {
    interrupt(core);
    core.state = PlaybackState::Processing;
    vec![Action::StopOutput]
}

fn on_chapter_loaded(core: &mut EngineCore, len: usize) -> Vec<Action> {
    interrupt(core);
    core.len = len;
    core.position = PlaybackPosition::default();
    core.state = PlaybackState::Idle;
    vec![Action::StopOutput]
}

fn on_ingest_failed(core: &mut EngineCore) -> Vec<Action> {
    if core.state == PlaybackState::Processing {
        core.state = PlaybackState::Idle;
    }
    Vec::new()
}

fn on_chapter_unloaded(core: &mut EngineCore) -> Vec<Action> {
    interrupt(core);
    core.len = 0;
    core.position = PlaybackPosition::default();
    if core.state != PlaybackState::Processing {
        core.state = PlaybackState::Idle;
    }
    vec![Action::StopOutput]
}

/// Whether a fetch result belongs to the phase currently being played.
fn accepts(core: &EngineCore, generation: u64, position: PlaybackPosition) -> bool {
    let current =
        core.state.is_playing() && core.is_current(generation) && core.position == position;
    if !current {
        debug!(
            generation,
            current = core.generation,
            %position,
            "Ignoring stale audio result"
        );
    }
    current
}

/// Detach whatever is pending so late events are recognized as stale.
fn interrupt(core: &mut EngineCore) {
    core.generation = core.generation.wrapping_add(1);
    core.buffering = false;
}

fn begin_phase(core: &mut EngineCore, position: PlaybackPosition) -> Vec<Action> {
    core.generation = core.generation.wrapping_add(1);
    core.position = position;
    core.state = PlaybackState::for_phase(position.phase);
    core.buffering = true;
    vec![
        Action::FetchPhase {
            position,
            generation: core.generation,
        },
        Action::Prefetch {
            index: position.index,
        },
    ]
}

/// The current phase has completed or been skipped.
fn advance(core: &mut EngineCore) -> Vec<Action> {
    core.phases_completed += 1;
    let PlaybackPosition { index, phase } = core.position;
    match phase {
        Phase::Source => begin_phase(core, PlaybackPosition::new(index, Phase::Target)),
        Phase::Target if index + 1 < core.len => {
            begin_phase(core, PlaybackPosition::source(index + 1))
        }
        Phase::Target => {
            interrupt(core);
            core.state = PlaybackState::Idle;
            info!(sentences = core.len, "Reached end of chapter");
            vec![Action::Notify(EngineNotice::ChapterFinished)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    /// Drives the state machine synchronously: fetches resolve immediately and
    /// output only finishes when the test says so.
    struct Sim {
        core: EngineCore,
        failing: HashSet<PlaybackPosition>,
        playing: Option<(PlaybackPosition, u64)>,
        started: Vec<PlaybackPosition>,
        notices: Vec<EngineNotice>,
        stops: usize,
    }

    impl Sim {
        fn with_chapter(len: usize) -> Self {
            let mut sim = Self {
                core: EngineCore::default(),
                failing: HashSet::new(),
                playing: None,
                started: Vec::new(),
                notices: Vec::new(),
                stops: 0,
            };
            sim.apply(Input::ChapterLoaded { len });
            sim
        }

        fn apply(&mut self, input: Input) {
            let mut queue = VecDeque::from([input]);
            while let Some(input) = queue.pop_front() {
                for action in transition(&mut self.core, input) {
                    match action {
                        Action::StopOutput => {
                            self.playing = None;
                            self.stops += 1;
                        }
                        Action::FetchPhase {
                            position,
                            generation,
                        } => {
                            if self.failing.contains(&position) {
                                queue.push_back(Input::AudioFailed {
                                    generation,
                                    position,
                                });
                            } else {
                                queue.push_back(Input::AudioReady {
                                    generation,
                                    position,
                                });
                            }
                        }
                        Action::StartOutput {
                            position,
                            generation,
                        } => {
                            self.playing = Some((position, generation));
                            self.started.push(position);
                        }
                        Action::Prefetch { .. } => {}
                        Action::Notify(notice) => self.notices.push(notice),
                    }
                }
            }
        }

        /// Let the active clip drain.
        fn finish(&mut self) -> bool {
            match self.playing.take() {
                Some((_, generation)) => {
                    self.apply(Input::OutputFinished { generation });
                    true
                }
                None => false,
            }
        }

        fn run_to_end(&mut self, limit: usize) -> usize {
            let mut steps = 0;
            while self.finish() {
                steps += 1;
                assert!(steps <= limit, "playback did not terminate");
            }
            steps
        }
    }

    fn p(index: usize, phase: Phase) -> PlaybackPosition {
        PlaybackPosition::new(index, phase)
    }

    #[test]
    fn plays_source_then_target_for_every_sentence() {
        let mut sim = Sim::with_chapter(3);
        sim.apply(Input::Play);
        assert_eq!(sim.core.state, PlaybackState::PlayingSource);
        sim.run_to_end(6);

        assert_eq!(
            sim.started,
            vec![
                p(0, Phase::Source),
                p(0, Phase::Target),
                p(1, Phase::Source),
                p(1, Phase::Target),
                p(2, Phase::Source),
                p(2, Phase::Target),
            ]
        );
        assert_eq!(sim.core.state, PlaybackState::Idle);
        assert_eq!(sim.core.position.index, 2);
        assert_eq!(sim.notices.last(), Some(&EngineNotice::ChapterFinished));
    }

    #[test]
    fn failing_phases_are_skipped_and_playback_terminates() {
        let mut sim = Sim::with_chapter(4);
        for index in 0..4 {
            for phase in Phase::BOTH {
                sim.failing.insert(p(index, phase));
            }
        }
        sim.apply(Input::Play);

        assert_eq!(sim.core.state, PlaybackState::Idle);
        assert_eq!(sim.core.phases_completed, 8);
        assert!(sim.started.is_empty());
        let skipped = sim
            .notices
            .iter()
            .filter(|n| matches!(n, EngineNotice::PhaseSkipped(_)))
            .count();
        assert_eq!(skipped, 8);
    }

    #[test]
    fn partial_failures_keep_phase_order() {
        let mut sim = Sim::with_chapter(3);
        sim.failing.insert(p(0, Phase::Target));
        sim.failing.insert(p(1, Phase::Source));
        sim.apply(Input::Play);
        let steps = sim.run_to_end(6);

        assert_eq!(steps, 4);
        assert_eq!(
            sim.started,
            vec![
                p(0, Phase::Source),
                p(1, Phase::Target),
                p(2, Phase::Source),
                p(2, Phase::Target),
            ]
        );
        assert!(sim.core.phases_completed <= 2 * 3);
    }

    #[test]
    fn index_never_decreases_during_natural_playback() {
        let mut sim = Sim::with_chapter(5);
        sim.apply(Input::Play);
        let mut last = sim.core.position.index;
        while sim.finish() {
            assert!(sim.core.position.index >= last);
            assert!(sim.core.position.index < 5);
            last = sim.core.position.index;
        }
    }

    #[test]
    fn completion_after_pause_is_ignored() {
        let mut sim = Sim::with_chapter(3);
        sim.apply(Input::Play);
        let (_, generation) = sim.playing.expect("playing");

        sim.apply(Input::Pause);
        sim.apply(Input::OutputFinished { generation });

        assert_eq!(sim.core.state, PlaybackState::Paused);
        assert_eq!(sim.core.position, p(0, Phase::Source));
        assert_eq!(sim.core.phases_completed, 0);
        assert!(sim.stops >= 2);
    }

    #[test]
    fn late_fetch_result_after_seek_is_ignored() {
        let mut core = EngineCore::default();
        transition(&mut core, Input::ChapterLoaded { len: 3 });
        let actions = transition(&mut core, Input::Play);
        let Some(Action::FetchPhase { generation, .. }) = actions.get(1).cloned() else {
            panic!("expected fetch, got {actions:?}");
        };

        transition(&mut core, Input::Next);
        let late = transition(
            &mut core,
            Input::AudioReady {
                generation,
                position: p(0, Phase::Source),
            },
        );
        assert!(late.is_empty());
        assert_eq!(core.position, p(1, Phase::Source));
        assert!(core.buffering);
    }

    #[test]
    fn seeking_clamps_to_chapter_bounds() {
        let mut sim = Sim::with_chapter(3);
        sim.apply(Input::Prev);
        assert_eq!(sim.core.position.index, 0);

        sim.apply(Input::Select(99));
        assert_eq!(sim.core.position, p(2, Phase::Source));
        assert_eq!(sim.core.state, PlaybackState::Paused);

        sim.apply(Input::Next);
        assert_eq!(sim.core.position.index, 2);
        assert!(sim.playing.is_none());
    }

    #[test]
    fn seeking_while_playing_resumes_at_source() {
        let mut sim = Sim::with_chapter(4);
        sim.apply(Input::Play);
        sim.finish();
        assert_eq!(sim.core.position, p(0, Phase::Target));

        sim.apply(Input::Next);
        assert_eq!(sim.core.state, PlaybackState::PlayingSource);
        assert_eq!(sim.playing.map(|(pos, _)| pos), Some(p(1, Phase::Source)));

        sim.apply(Input::Prev);
        assert_eq!(sim.playing.map(|(pos, _)| pos), Some(p(0, Phase::Source)));
    }

    #[test]
    fn play_after_pause_restarts_sentence_source() {
        let mut sim = Sim::with_chapter(2);
        sim.apply(Input::Play);
        sim.finish();
        sim.apply(Input::TogglePlayPause);
        assert_eq!(sim.core.state, PlaybackState::Paused);
        assert_eq!(sim.core.position, p(0, Phase::Target));

        sim.apply(Input::TogglePlayPause);
        assert_eq!(sim.core.state, PlaybackState::PlayingSource);
        assert_eq!(sim.core.position, p(0, Phase::Source));
    }

    #[test]
    fn transport_is_ignored_while_processing() {
        let mut sim = Sim::with_chapter(2);
        sim.apply(Input::IngestStarted);
        sim.apply(Input::Play);
        sim.apply(Input::Select(1));
        assert_eq!(sim.core.state, PlaybackState::Processing);
        assert!(sim.playing.is_none());

        sim.apply(Input::IngestFailed);
        assert_eq!(sim.core.state, PlaybackState::Idle);
        assert_eq!(sim.core.len, 2);
    }

    #[test]
    fn without_a_chapter_nothing_plays() {
        let mut core = EngineCore::default();
        assert!(transition(&mut core, Input::Play).is_empty());
        assert!(transition(&mut core, Input::Next).is_empty());
        assert_eq!(core.state, PlaybackState::Idle);
    }
}
