//! The playback engine: one task that owns the transport state, the audio
//! output and the active chapter.
//!
//! Every input (user commands, fetch results, output completions, ingestion
//! and lookup results) arrives as an event on the engine's channels and is
//! handled to completion before the next one is read. Decisions are made by
//! [`transitions::transition`]; this module only performs the effects it
//! asks for and publishes a [`PlayerSnapshot`] afterwards.

pub mod commands;
pub mod prefetch;
pub mod state;
pub mod transitions;

pub use commands::{PlayerCommand, Reply};
pub use prefetch::Prefetcher;
pub use state::{EngineCore, EngineNotice, PlaybackState, PlayerSnapshot};

use crate::audio::AudioOutput;
use crate::cache::AudioCache;
use crate::config::{AppConfig, clamp_playback_rate};
use crate::error::{ReaderError, ReaderResult};
use crate::gateway::Collaborators;
use crate::ingest::{IngestRequest, Ingestor};
use crate::keymap::{KeyAction, Keymap};
use crate::library::Library;
use crate::lookup::{LookupStatus, clean_word, define_word};
use crate::model::{Book, Definition, Phase, PlaybackPosition};
use crate::store::{RetryPolicy, SentenceStore};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use transitions::{Action, Input, transition};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub playback_rate: f32,
    pub prefetch_depth: usize,
    pub retry: RetryPolicy,
    pub keymap: Keymap,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            playback_rate: config.clamped_playback_rate(),
            prefetch_depth: config.prefetch_depth,
            retry: RetryPolicy {
                retries: config.synthesis_retries,
                backoff: config.retry_backoff(),
            },
            keymap: Keymap::from_config(config),
        }
    }
}

/// Results of work the engine spawned, posted back into its loop.
enum InternalEvent {
    FetchDone {
        generation: u64,
        position: PlaybackPosition,
        result: ReaderResult<()>,
    },
    OutputFinished {
        generation: u64,
    },
    IngestDone {
        result: ReaderResult<Book>,
        reply: Reply<Book>,
    },
    LookupDone {
        ticket: u64,
        word: String,
        result: ReaderResult<Definition>,
        reply: Reply<Definition>,
    },
}

enum EngineEvent {
    Command(PlayerCommand),
    Internal(InternalEvent),
}

pub struct PlaybackEngine {
    core: EngineCore,
    library: Library,
    cache: AudioCache,
    store: Option<SentenceStore>,
    collaborators: Collaborators,
    ingestor: Ingestor,
    prefetcher: Prefetcher,
    output: Box<dyn AudioOutput>,
    options: EngineOptions,
    rate: f32,
    lookup: LookupStatus,
    lookup_ticket: u64,
    last_error: Option<String>,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    snapshot_tx: watch::Sender<PlayerSnapshot>,
    notices: broadcast::Sender<EngineNotice>,
}

impl PlaybackEngine {
    pub fn new(
        library: Library,
        collaborators: Collaborators,
        output: Box<dyn AudioOutput>,
        options: EngineOptions,
    ) -> (Self, EngineHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let rate = clamp_playback_rate(options.playback_rate);
        let (snapshot_tx, snapshot_rx) = watch::channel(PlayerSnapshot {
            rate,
            ..PlayerSnapshot::default()
        });

        let engine = Self {
            core: EngineCore::default(),
            library,
            cache: AudioCache::new(),
            store: None,
            ingestor: Ingestor::new(collaborators.translator.clone()),
            prefetcher: Prefetcher::new(
                collaborators.synthesizer.clone(),
                options.prefetch_depth,
                options.retry,
            ),
            collaborators,
            output,
            options,
            rate,
            lookup: LookupStatus::Closed,
            lookup_ticket: 0,
            last_error: None,
            commands,
            internal_tx,
            internal_rx,
            snapshot_tx,
            notices: notices.clone(),
        };
        let handle = EngineHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            notices,
        };
        (engine, handle)
    }

    /// Process events until shutdown or until every handle is dropped.
    /// Returns the library so the caller can inspect or save it.
    pub async fn run(mut self) -> Library {
        info!(documents = self.library.len(), "Playback engine started");
        loop {
            self.publish();
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => EngineEvent::Command(command),
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => EngineEvent::Internal(internal),
            };
            let flow = match event {
                EngineEvent::Command(command) => self.handle_command(command),
                EngineEvent::Internal(internal) => {
                    self.handle_internal(internal);
                    ControlFlow::Continue(())
                }
            };
            if flow.is_break() {
                break;
            }
        }

        self.output.stop();
        self.publish();
        info!("Playback engine stopped");
        let path = self.library.path().to_path_buf();
        std::mem::replace(&mut self.library, Library::empty(path))
    }

    fn handle_command(&mut self, command: PlayerCommand) -> ControlFlow<()> {
        debug!(action = command.action(), "Handling player command");
        match command {
            PlayerCommand::Play => self.apply(Input::Play),
            PlayerCommand::Pause | PlayerCommand::Stop => self.apply(Input::Pause),
            PlayerCommand::TogglePlayPause => self.apply(Input::TogglePlayPause),
            PlayerCommand::Next => self.apply(Input::Next),
            PlayerCommand::Prev => self.apply(Input::Prev),
            PlayerCommand::SelectSentence(index) => self.apply(Input::Select(index)),
            PlayerCommand::SetRate(rate) => self.set_rate(rate),
            PlayerCommand::OpenDocument { id, reply } => {
                let _ = reply.send(self.open_document(&id));
            }
            PlayerCommand::RemoveDocument { id, reply } => {
                let _ = reply.send(self.remove_document(&id));
            }
            PlayerCommand::LoadDocument { request, reply } => self.load_document(request, reply),
            PlayerCommand::Lookup {
                word,
                context,
                reply,
            } => self.start_lookup(&word, context, reply),
            PlayerCommand::DismissLookup => {
                self.lookup_ticket = self.lookup_ticket.wrapping_add(1);
                self.lookup = LookupStatus::Closed;
            }
            PlayerCommand::Key(pressed) => {
                return self.handle_key(&pressed);
            }
            PlayerCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_key(&mut self, pressed: &str) -> ControlFlow<()> {
        let Some(action) = self.options.keymap.resolve(pressed, self.lookup.is_open()) else {
            debug!(pressed, lookup_open = self.lookup.is_open(), "Key ignored");
            return ControlFlow::Continue(());
        };
        match action {
            KeyAction::TogglePlayPause => self.apply(Input::TogglePlayPause),
            KeyAction::NextSentence => self.apply(Input::Next),
            KeyAction::PrevSentence => self.apply(Input::Prev),
            KeyAction::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::FetchDone {
                generation,
                position,
                result,
            } => match result {
                Ok(()) => self.apply(Input::AudioReady {
                    generation,
                    position,
                }),
                Err(err) => {
                    if self.core.is_current(generation) {
                        warn!(%position, "Skipping phase after synthesis failure: {err}");
                    } else {
                        debug!(%position, "Late synthesis failure ignored: {err}");
                    }
                    self.apply(Input::AudioFailed {
                        generation,
                        position,
                    });
                }
            },
            InternalEvent::OutputFinished { generation } => {
                self.apply(Input::OutputFinished { generation })
            }
            InternalEvent::IngestDone { result, reply } => self.finish_ingest(result, reply),
            InternalEvent::LookupDone {
                ticket,
                word,
                result,
                reply,
            } => {
                if ticket == self.lookup_ticket {
                    self.lookup = match &result {
                        Ok(definition) => LookupStatus::Ready(definition.clone()),
                        Err(err) => LookupStatus::Failed {
                            word,
                            message: err.to_string(),
                        },
                    };
                } else {
                    debug!(word, "Lookup finished after it was dismissed");
                }
                let _ = reply.send(result);
            }
        }
    }

    /// Feed an input through the state machine and perform the resulting
    /// actions, including any inputs they produce synchronously.
    fn apply(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            for action in transition(&mut self.core, input) {
                if let Some(next) = self.perform(action) {
                    queue.push_back(next);
                }
            }
        }
    }

    fn perform(&mut self, action: Action) -> Option<Input> {
        match action {
            Action::StopOutput => {
                self.output.stop();
                None
            }
            Action::FetchPhase {
                position,
                generation,
            } => self.fetch_phase(position, generation),
            Action::StartOutput {
                position,
                generation,
            } => self.start_output(position, generation),
            Action::Prefetch { index } => {
                if let Some(store) = &self.store {
                    let spawned = self.prefetcher.warm(store, index);
                    if spawned > 0 {
                        debug!(index, spawned, "Prefetching upcoming sentences");
                    }
                }
                None
            }
            Action::Notify(notice) => {
                self.notify(notice);
                None
            }
        }
    }

    fn fetch_phase(&mut self, position: PlaybackPosition, generation: u64) -> Option<Input> {
        let Some(store) = self.store.clone() else {
            return Some(Input::AudioFailed {
                generation,
                position,
            });
        };
        if store.is_cached(position) {
            return Some(Input::AudioReady {
                generation,
                position,
            });
        }

        debug!(%position, generation, "Fetching phase audio");
        let synthesizer = self.collaborators.synthesizer.clone();
        let retry = self.options.retry;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = store
                .fetch_audio(synthesizer.as_ref(), position, retry)
                .await
                .map(|_| ());
            let _ = tx.send(InternalEvent::FetchDone {
                generation,
                position,
                result,
            });
        });
        None
    }

    fn start_output(&mut self, position: PlaybackPosition, generation: u64) -> Option<Input> {
        let failed = Input::AudioFailed {
            generation,
            position,
        };
        let Some(clip) = self.store.as_ref().and_then(|store| store.cached(position)) else {
            warn!(%position, "Audio vanished from cache before playback");
            return Some(failed);
        };

        let tx = self.internal_tx.clone();
        let on_finished = Box::new(move || {
            let _ = tx.send(InternalEvent::OutputFinished { generation });
        });
        match self.output.play(clip, self.rate, on_finished) {
            Ok(()) => {
                debug!(%position, generation, rate = self.rate, "Started phase output");
                None
            }
            Err(err) => {
                warn!(%position, "Audio output refused clip: {err:#}");
                Some(failed)
            }
        }
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = clamp_playback_rate(rate);
        self.output.set_rate(self.rate);
        info!(rate = self.rate, "Playback rate changed");
    }

    fn open_document(&mut self, id: &str) -> ReaderResult<()> {
        if self.core.state == PlaybackState::Processing {
            return Err(ReaderError::InvalidInput(
                "a document is still being processed".to_string(),
            ));
        }
        let book = self
            .library
            .get(id)
            .cloned()
            .ok_or_else(|| ReaderError::UnknownDocument(id.to_string()))?;
        self.activate(&book)
    }

    fn activate(&mut self, book: &Book) -> ReaderResult<()> {
        let store = SentenceStore::from_book(book, 0, self.cache.clone())?;
        let len = store.len();
        self.store = Some(store);
        self.lookup_ticket = self.lookup_ticket.wrapping_add(1);
        self.lookup = LookupStatus::Closed;
        self.apply(Input::ChapterLoaded { len });
        info!(document_id = %book.id, sentences = len, "Activated document");
        self.notify(EngineNotice::DocumentActivated {
            id: book.id.clone(),
            title: book.title.clone(),
        });
        Ok(())
    }

    fn remove_document(&mut self, id: &str) -> ReaderResult<Book> {
        let removed = self.library.remove(id)?;
        if let Err(err) = self.library.save() {
            self.library.add(removed);
            return Err(err);
        }
        self.cache.evict_document(id);
        let active = self
            .store
            .as_ref()
            .map(|store| store.document_id() == id)
            .unwrap_or(false);
        if active {
            self.store = None;
            self.apply(Input::ChapterUnloaded);
        }
        info!(document_id = id, "Removed document");
        self.notify(EngineNotice::DocumentRemoved { id: id.to_string() });
        Ok(removed)
    }

    fn load_document(&mut self, request: IngestRequest, reply: Reply<Book>) {
        if self.core.state == PlaybackState::Processing {
            let _ = reply.send(Err(ReaderError::InvalidInput(
                "a document is already being processed".to_string(),
            )));
            return;
        }
        self.last_error = None;
        self.apply(Input::IngestStarted);

        let ingestor = self.ingestor.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = ingestor.ingest(&request).await;
            let _ = tx.send(InternalEvent::IngestDone { result, reply });
        });
    }

    fn finish_ingest(&mut self, result: ReaderResult<Book>, reply: Reply<Book>) {
        let outcome = result.and_then(|book| {
            self.library.add(book.clone());
            if let Err(err) = self.library.save() {
                let _ = self.library.remove(&book.id);
                return Err(err);
            }
            Ok(book)
        });

        let outcome = match outcome {
            Ok(book) => self.activate(&book).map(|()| book),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!("Document ingestion failed: {err}");
            self.last_error = Some(err.to_string());
            self.apply(Input::IngestFailed);
            self.notify(EngineNotice::IngestFailed {
                message: err.to_string(),
            });
        }
        let _ = reply.send(outcome);
    }

    fn start_lookup(&mut self, raw_word: &str, context: Option<String>, reply: Reply<Definition>) {
        let Some(word) = clean_word(raw_word) else {
            let _ = reply.send(Err(ReaderError::InvalidInput(format!(
                "'{raw_word}' contains no word to look up"
            ))));
            return;
        };
        let Some(store) = &self.store else {
            let _ = reply.send(Err(ReaderError::InvalidInput(
                "open a document before looking up words".to_string(),
            )));
            return;
        };
        let target_language = store.language(Phase::Target).to_string();
        let context = context.unwrap_or_else(|| {
            store
                .text(PlaybackPosition::source(self.core.position.index))
                .unwrap_or_default()
                .to_string()
        });

        self.apply(Input::LookupStarted);
        self.lookup_ticket = self.lookup_ticket.wrapping_add(1);
        let ticket = self.lookup_ticket;
        self.lookup = LookupStatus::Pending { word: word.clone() };

        let lexicon = self.collaborators.lexicon.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = define_word(lexicon.as_ref(), &word, &context, &target_language).await;
            let _ = tx.send(InternalEvent::LookupDone {
                ticket,
                word,
                result,
                reply,
            });
        });
    }

    fn notify(&self, notice: EngineNotice) {
        debug!(?notice, "Engine notice");
        let _ = self.notices.send(notice);
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.core.state,
            position: self.core.position,
            len: self.core.len,
            buffering: self.core.buffering,
            rate: self.rate,
            lookup: self.lookup.clone(),
            last_error: self.last_error.clone(),
            document_id: self.store.as_ref().map(|s| s.document_id().to_string()),
            document_title: self.store.as_ref().map(|s| s.title().to_string()),
            phases_completed: self.core.phases_completed,
            cached_clips: self.cache.len(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.output.stop();
    }
}

/// Cloneable front door to a running [`PlaybackEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    notices: broadcast::Sender<EngineNotice>,
}

impl EngineHandle {
    pub fn send(&self, command: PlayerCommand) -> ReaderResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ReaderError::EngineStopped)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&PlayerSnapshot) -> bool,
    ) -> ReaderResult<PlayerSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ReaderError::EngineStopped)?;
        Ok(snapshot.clone())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> PlayerCommand) -> ReaderResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| ReaderError::EngineStopped)?
    }

    /// Ingest text into a new document, add it to the library and open it.
    pub async fn load_document(&self, request: IngestRequest) -> ReaderResult<Book> {
        self.request(|reply| PlayerCommand::LoadDocument { request, reply })
            .await
    }

    pub async fn open_document(&self, id: &str) -> ReaderResult<()> {
        let id = id.to_string();
        self.request(|reply| PlayerCommand::OpenDocument { id, reply })
            .await
    }

    pub async fn remove_document(&self, id: &str) -> ReaderResult<Book> {
        let id = id.to_string();
        self.request(|reply| PlayerCommand::RemoveDocument { id, reply })
            .await
    }

    pub async fn lookup(&self, word: &str, context: Option<String>) -> ReaderResult<Definition> {
        let word = word.to_string();
        self.request(|reply| PlayerCommand::Lookup {
            word,
            context,
            reply,
        })
        .await
    }

    pub fn shutdown(&self) -> ReaderResult<()> {
        self.send(PlayerCommand::Shutdown)
    }
}
