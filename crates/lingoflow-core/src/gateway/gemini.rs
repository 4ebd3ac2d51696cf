//! Gemini `generateContent` client implementing every collaborator role.

use super::{Lexicon, SpeechSynthesizer, Translator};
use crate::audio::AudioClip;
use crate::config::AppConfig;
use crate::model::{Definition, SentencePair};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

const USER_AGENT: &str = concat!("lingoflow/", env!("CARGO_PKG_VERSION"));

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    config: AppConfig,
}

impl GeminiClient {
    /// Build a client, reading the API key from the configured variable.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("Set {} to a Gemini API key", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &AppConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Building HTTP client")?;
        info!(
            base_url = %config.api_base_url,
            translation_model = %config.translation_model,
            tts_model = %config.tts_model,
            "Configured Gemini client"
        );
        Ok(Self {
            http,
            api_key,
            config: config.clone(),
        })
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base_url.trim_end_matches('/'),
            model
        );
        debug!(%url, "Sending generateContent request");
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Requesting {model}"))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("{model} returned {status}: {}", truncate(&detail, 300));
        }
        resp.json::<GenerateContentResponse>()
            .await
            .with_context(|| format!("Decoding {model} response"))
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioClip> {
        let body = json!({
            "contents": [{ "parts": [{ "text": speech_prompt(text, language) }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.config.voice_for(language) }
                    }
                }
            }
        });
        let response = self.generate(&self.config.tts_model, &body).await?;
        decode_speech(&response, self.config.sample_rate)
    }
}

#[async_trait]
impl Translator for GeminiClient {
    async fn segment_and_translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<SentencePair>> {
        let prompt = format!(
            "Split the following {source_language} text into individual sentences and \
             translate each into clear, contextual {target_language}. Return a JSON array \
             of objects with keys \"source\" and \"target\".\n\nText: {text}"
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "source": { "type": "STRING" },
                            "target": { "type": "STRING" }
                        },
                        "required": ["source", "target"]
                    }
                }
            }
        });
        let response = self.generate(&self.config.translation_model, &body).await?;
        parse_sentence_pairs(response.first_text()?)
    }
}

#[async_trait]
impl Lexicon for GeminiClient {
    async fn define(
        &self,
        word: &str,
        context: &str,
        target_language: &str,
    ) -> Result<Definition> {
        let prompt = format!(
            "Define the word \"{word}\" as it is used in this sentence: \"{context}\". \
             Write the definition and one short example sentence in {target_language}."
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "word": { "type": "STRING" },
                        "definition": { "type": "STRING" },
                        "example": { "type": "STRING" }
                    },
                    "required": ["word", "definition"]
                }
            }
        });
        let response = self.generate(&self.config.translation_model, &body).await?;
        parse_definition(response.first_text()?)
    }
}

/// Language-specific instruction placed before the text to be spoken.
pub fn speech_prompt(text: &str, language: &str) -> String {
    match language.trim().to_ascii_lowercase().as_str() {
        "fa" => format!("بگو: {text}"),
        _ => format!("Say clearly: {text}"),
    }
}

pub fn parse_sentence_pairs(raw: &str) -> Result<Vec<SentencePair>> {
    let pairs: Vec<SentencePair> =
        serde_json::from_str(raw.trim()).context("Translation response is not a pair array")?;
    Ok(pairs)
}

pub fn parse_definition(raw: &str) -> Result<Definition> {
    let mut definition: Definition =
        serde_json::from_str(raw.trim()).context("Definition response is not an object")?;
    if definition.definition.trim().is_empty() {
        bail!("Definition response for '{}' is empty", definition.word);
    }
    definition.example = definition
        .example
        .take()
        .map(|example| example.trim().to_string())
        .filter(|example| !example.is_empty());
    Ok(definition)
}

/// Decode the first inline audio part into a clip.
pub fn decode_speech(response: &GenerateContentResponse, fallback_rate: u32) -> Result<AudioClip> {
    let inline = response
        .parts()
        .find_map(|part| part.inline_data.as_ref())
        .ok_or_else(|| anyhow!("Speech response carried no audio"))?;
    let bytes = general_purpose::STANDARD
        .decode(inline.data.trim())
        .context("Speech response audio is not valid base64")?;
    if bytes.len() < 2 {
        bail!("Speech response audio is empty");
    }
    let rate = inline
        .mime_type
        .as_deref()
        .and_then(sample_rate_from_mime)
        .unwrap_or(fallback_rate);
    Ok(AudioClip::from_pcm16le(&bytes, rate))
}

/// Extract `rate=N` from a mime type such as `audio/L16;codec=pcm;rate=24000`.
fn sample_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.iter())
            .into_iter()
            .flatten()
    }

    fn first_text(&self) -> Result<&str> {
        self.parts()
            .find_map(|part| part.text.as_deref())
            .ok_or_else(|| anyhow!("Response carried no text part"))
    }
}
