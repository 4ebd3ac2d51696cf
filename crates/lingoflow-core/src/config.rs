//! Configuration loading for the reader.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so the reader can still launch.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_PLAYBACK_RATE: f32 = 0.5;
pub const MAX_PLAYBACK_RATE: f32 = 2.0;

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_translation_model")]
    pub translation_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    /// Voice per language tag, e.g. `en = "Kore"`.
    #[serde(default = "default_voices")]
    pub voices: BTreeMap<String, String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f32,
    #[serde(default = "default_prefetch_depth")]
    pub prefetch_depth: usize,
    /// Extra synthesis attempts before a phase is skipped.
    #[serde(default)]
    pub synthesis_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_output_poll_interval_ms")]
    pub output_poll_interval_ms: u64,
    #[serde(default = "default_export_progress_log_interval_secs")]
    pub export_progress_log_interval_secs: f32,
    #[serde(default = "default_key_toggle_play_pause")]
    pub key_toggle_play_pause: String,
    #[serde(default = "default_key_next_sentence")]
    pub key_next_sentence: String,
    #[serde(default = "default_key_prev_sentence")]
    pub key_prev_sentence: String,
    #[serde(default = "default_key_quit")]
    pub key_quit: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            translation_model: default_translation_model(),
            tts_model: default_tts_model(),
            default_voice: default_voice(),
            voices: default_voices(),
            sample_rate: default_sample_rate(),
            playback_rate: default_playback_rate(),
            prefetch_depth: default_prefetch_depth(),
            synthesis_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            output_poll_interval_ms: default_output_poll_interval_ms(),
            export_progress_log_interval_secs: default_export_progress_log_interval_secs(),
            key_toggle_play_pause: default_key_toggle_play_pause(),
            key_next_sentence: default_key_next_sentence(),
            key_prev_sentence: default_key_prev_sentence(),
            key_quit: default_key_quit(),
        }
    }
}

impl AppConfig {
    pub fn voice_for(&self, language: &str) -> &str {
        self.voices
            .get(&language.trim().to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.default_voice)
    }

    pub fn clamped_playback_rate(&self) -> f32 {
        clamp_playback_rate(self.playback_rate)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn output_poll_interval(&self) -> Duration {
        Duration::from_millis(self.output_poll_interval_ms.max(1))
    }

    pub fn export_progress_log_interval(&self) -> Duration {
        Duration::from_secs_f32(self.export_progress_log_interval_secs.max(0.0))
    }
}

pub fn clamp_playback_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
    } else {
        1.0
    }
}

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            AppConfig::default()
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".lingoflow")
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_translation_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}

fn default_voices() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("en".to_string(), "Kore".to_string()),
        ("fa".to_string(), "Puck".to_string()),
    ])
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_playback_rate() -> f32 {
    1.0
}

fn default_prefetch_depth() -> usize {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_output_poll_interval_ms() -> u64 {
    8
}

fn default_export_progress_log_interval_secs() -> f32 {
    5.0
}

fn default_key_toggle_play_pause() -> String {
    "space".to_string()
}

fn default_key_next_sentence() -> String {
    "right".to_string()
}

fn default_key_prev_sentence() -> String {
    "left".to_string()
}

fn default_key_quit() -> String {
    "q".to_string()
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
