use crate::error::ReaderResult;
use crate::ingest::IngestRequest;
use crate::model::{Book, Definition};
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<ReaderResult<T>>;

/// Intents forwarded to the playback engine.
#[derive(Debug)]
pub enum PlayerCommand {
    Play,
    Pause,
    Stop,
    TogglePlayPause,
    Next,
    Prev,
    SelectSentence(usize),
    SetRate(f32),
    OpenDocument {
        id: String,
        reply: Reply<()>,
    },
    RemoveDocument {
        id: String,
        reply: Reply<Book>,
    },
    LoadDocument {
        request: IngestRequest,
        reply: Reply<Book>,
    },
    /// Define `word`; `context` defaults to the current source sentence.
    Lookup {
        word: String,
        context: Option<String>,
        reply: Reply<Definition>,
    },
    DismissLookup,
    /// A raw key token such as `space` or `right`.
    Key(String),
    Shutdown,
}

impl PlayerCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Play => "player_play",
            Self::Pause => "player_pause",
            Self::Stop => "player_stop",
            Self::TogglePlayPause => "player_toggle_play_pause",
            Self::Next => "player_next",
            Self::Prev => "player_prev",
            Self::SelectSentence(_) => "player_select_sentence",
            Self::SetRate(_) => "player_set_rate",
            Self::OpenDocument { .. } => "library_open_document",
            Self::RemoveDocument { .. } => "library_remove_document",
            Self::LoadDocument { .. } => "library_load_document",
            Self::Lookup { .. } => "lookup_word",
            Self::DismissLookup => "lookup_dismiss",
            Self::Key(_) => "keyboard_key",
            Self::Shutdown => "engine_shutdown",
        }
    }
}
