//! Keyboard control surface: configurable bindings for the transport keys.

use crate::config::AppConfig;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    TogglePlayPause,
    NextSentence,
    PrevSentence,
    Quit,
}

/// A key plus the modifiers that must be held, e.g. `ctrl+right`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Chord {
    modifiers: BTreeSet<&'static str>,
    key: String,
}

#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: Vec<(Chord, KeyAction)>,
}

impl Default for Keymap {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl Keymap {
    pub fn from_config(config: &AppConfig) -> Self {
        let bindings = vec![
            (
                parse_chord(&config.key_toggle_play_pause, "space"),
                KeyAction::TogglePlayPause,
            ),
            (
                parse_chord(&config.key_next_sentence, "right"),
                KeyAction::NextSentence,
            ),
            (
                parse_chord(&config.key_prev_sentence, "left"),
                KeyAction::PrevSentence,
            ),
            (parse_chord(&config.key_quit, "q"), KeyAction::Quit),
        ];
        Self { bindings }
    }

    /// Map a pressed key to an action. Every key is swallowed while a word
    /// lookup is open or pending.
    pub fn resolve(&self, pressed: &str, lookup_open: bool) -> Option<KeyAction> {
        if lookup_open {
            return None;
        }
        let pressed = parse_chord(pressed, "");
        if pressed.key.is_empty() {
            return None;
        }
        self.bindings
            .iter()
            .find(|(chord, _)| *chord == pressed)
            .map(|(_, action)| *action)
    }
}

pub fn normalize_key_token(raw: &str, fallback: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return fallback.to_string();
    }
    normalized
        .replace("spacebar", "space")
        .replace("arrowleft", "left")
        .replace("arrowright", "right")
        .replace("leftarrow", "left")
        .replace("rightarrow", "right")
}

fn parse_chord(raw: &str, fallback: &str) -> Chord {
    // A lone space character is the space bar, not an empty binding.
    let raw = if raw == " " { "space" } else { raw };
    let normalized = normalize_key_token(raw, fallback);
    let mut modifiers = BTreeSet::new();
    let mut key = None;
    for token in normalized
        .split('+')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match token {
            "ctrl" | "control" => {
                modifiers.insert("ctrl");
            }
            "alt" => {
                modifiers.insert("alt");
            }
            "logo" | "meta" | "super" | "cmd" | "command" => {
                modifiers.insert("logo");
            }
            "shift" => {
                modifiers.insert("shift");
            }
            other => key = Some(other.to_string()),
        }
    }
    Chord {
        modifiers,
        key: key.unwrap_or_else(|| fallback.to_string()),
    }
}
