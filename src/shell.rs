//! Interactive playback: a line-oriented REPL in front of the engine.

use anyhow::{Context, Result, anyhow};
use lingoflow_core::audio::{AudioOutput, ClockOutput, RodioOutput};
use lingoflow_core::config::AppConfig;
use lingoflow_core::engine::{
    EngineHandle, EngineNotice, EngineOptions, PlaybackEngine, PlayerCommand, PlayerSnapshot,
};
use lingoflow_core::gateway::Collaborators;
use lingoflow_core::library::Library;
use lingoflow_core::model::{Book, Definition, PlaybackPosition};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HELP: &str = "\
Commands:
  <enter> | space   play / pause
  right | left      next / previous sentence
  goto N            jump to sentence N (pauses)
  rate R            playback rate, 0.5 to 2.0
  lookup WORD       define a word from the current sentence
  close             close the definition
  status            show the current position
  q | quit          stop and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellInput {
    Key(String),
    Goto(usize),
    Rate(f32),
    Lookup(String),
    Close,
    Status,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_shell_line(line: &str) -> ShellInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ShellInput::Key("space".to_string());
    }
    let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (trimmed, ""),
    };
    match (verb.to_ascii_lowercase().as_str(), rest) {
        ("goto", n) => match n.parse::<usize>() {
            Ok(n) if n >= 1 => ShellInput::Goto(n),
            _ => ShellInput::Invalid(format!("goto expects a sentence number, got '{n}'")),
        },
        ("rate", r) => match r.parse::<f32>() {
            Ok(r) if r.is_finite() => ShellInput::Rate(r),
            _ => ShellInput::Invalid(format!("rate expects a number, got '{r}'")),
        },
        ("lookup", "") => ShellInput::Invalid("lookup expects a word".to_string()),
        ("lookup", word) => ShellInput::Lookup(word.to_string()),
        ("close", "") => ShellInput::Close,
        ("status", "") => ShellInput::Status,
        ("help" | "?", "") => ShellInput::Help,
        ("quit" | "exit", "") => ShellInput::Quit,
        (_, "") => ShellInput::Key(verb.to_string()),
        _ => ShellInput::Invalid(format!("unrecognized input '{trimmed}'")),
    }
}

pub fn open_output(config: &AppConfig, headless: bool) -> Box<dyn AudioOutput> {
    if headless {
        info!("Headless playback; audio is timed but not rendered");
        return Box::new(ClockOutput::new());
    }
    match RodioOutput::open(config.output_poll_interval()) {
        Ok(output) => Box::new(output),
        Err(err) => {
            warn!("No audio device available, falling back to headless playback: {err:#}");
            Box::new(ClockOutput::new())
        }
    }
}

pub async fn play(
    config: &AppConfig,
    library: Library,
    collaborators: Collaborators,
    id: &str,
    start: Option<usize>,
    headless: bool,
) -> Result<()> {
    let book = library
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("No document with id {id}; run `lingoflow list`"))?;
    let output = open_output(config, headless);
    let (engine, handle) = PlaybackEngine::new(
        library,
        collaborators,
        output,
        EngineOptions::from_config(config),
    );
    let mut engine_task = tokio::spawn(engine.run());

    let ctrlc_handle = handle.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C; stopping playback");
        let _ = ctrlc_handle.shutdown();
    }) {
        warn!("Failed to install Ctrl+C signal handler: {err}");
    }

    let mut notices = handle.subscribe_notices();
    handle
        .open_document(id)
        .await
        .with_context(|| format!("Opening {id}"))?;
    if let Some(start) = start {
        handle.send(PlayerCommand::SelectSentence(start.saturating_sub(1)))?;
    }
    handle.send(PlayerCommand::Play)?;
    println!("{}  ({} sentences)", book.title, book.sentence_count());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut notices_open = true;
    let joined = loop {
        tokio::select! {
            joined = &mut engine_task => break joined,
            line = lines.next_line(), if stdin_open => {
                match line.context("Reading stdin")? {
                    Some(line) => {
                        if !run_input(&handle, &book, parse_shell_line(&line)) {
                            let _ = handle.shutdown();
                        }
                    }
                    None => {
                        debug!("Stdin closed; stopping playback");
                        stdin_open = false;
                        let _ = handle.shutdown();
                    }
                }
            }
            notice = notices.recv(), if notices_open => match notice {
                Ok(notice) => {
                    if let Some(text) = describe_notice(&notice, &book) {
                        println!("{text}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Notice stream lagged"),
                Err(RecvError::Closed) => notices_open = false,
            },
        }
    };
    joined.context("Playback engine task failed")?;
    Ok(())
}

/// Returns false when the user asked to leave.
fn run_input(handle: &EngineHandle, book: &Book, input: ShellInput) -> bool {
    let sent = match input {
        ShellInput::Key(key) => handle.send(PlayerCommand::Key(key)),
        ShellInput::Goto(n) => handle.send(PlayerCommand::SelectSentence(n - 1)),
        ShellInput::Rate(rate) => handle.send(PlayerCommand::SetRate(rate)),
        ShellInput::Lookup(word) => {
            // The definition prints whenever it arrives; the REPL keeps going.
            let handle = handle.clone();
            tokio::spawn(async move {
                match handle.lookup(&word, None).await {
                    Ok(definition) => println!("{}", describe_definition(&definition)),
                    Err(err) => println!("Lookup failed: {err}"),
                }
            });
            Ok(())
        }
        ShellInput::Close => handle.send(PlayerCommand::DismissLookup),
        ShellInput::Status => {
            println!("{}", describe_snapshot(&handle.snapshot(), book));
            Ok(())
        }
        ShellInput::Help => {
            println!("{HELP}");
            Ok(())
        }
        ShellInput::Quit => return false,
        ShellInput::Invalid(message) => {
            println!("{message}");
            Ok(())
        }
    };
    sent.is_ok()
}

fn sentence_text(book: &Book, position: PlaybackPosition) -> &str {
    book.chapters
        .first()
        .and_then(|chapter| chapter.sentences.get(position.index))
        .map(|sentence| sentence.text(position.phase))
        .unwrap_or("")
}

pub fn describe_notice(notice: &EngineNotice, book: &Book) -> Option<String> {
    let total = book.sentence_count();
    match notice {
        EngineNotice::PhaseStarted(position) => Some(format!(
            "[{}/{}] {} ({}): {}",
            position.index + 1,
            total,
            position.phase,
            book.language(position.phase),
            sentence_text(book, *position)
        )),
        EngineNotice::PhaseSkipped(position) => Some(format!(
            "[{}/{}] {} audio unavailable, skipped",
            position.index + 1,
            total,
            position.phase
        )),
        EngineNotice::ChapterFinished => Some("End of chapter.".to_string()),
        EngineNotice::IngestFailed { message } => Some(format!("Ingestion failed: {message}")),
        EngineNotice::PhaseCompleted(_)
        | EngineNotice::DocumentActivated { .. }
        | EngineNotice::DocumentRemoved { .. } => None,
    }
}

pub fn describe_definition(definition: &Definition) -> String {
    let mut text = format!("{}: {}", definition.word, definition.definition);
    if let Some(example) = &definition.example {
        text.push_str("\n  e.g. ");
        text.push_str(example);
    }
    text.push_str("\n(type `close` to resume control)");
    text
}

pub fn describe_snapshot(snapshot: &PlayerSnapshot, book: &Book) -> String {
    let mut line = format!(
        "{} at sentence {}/{} ({}), rate {:.2}",
        snapshot.state,
        snapshot.position.index + 1,
        snapshot.len,
        snapshot.position.phase,
        snapshot.rate
    );
    if snapshot.buffering {
        line.push_str(", loading audio");
    }
    if snapshot.lookup_open() {
        line.push_str(", definition open");
    }
    line.push_str(&format!(", {} clips cached", snapshot.cached_clips));
    let text = sentence_text(book, snapshot.position);
    if !text.is_empty() {
        line.push_str("\n  ");
        line.push_str(text);
    }
    line
}
