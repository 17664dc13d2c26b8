use std::path::{Path, PathBuf};

use async_trait::async_trait;
use leadline_core::config::SpeechConfig;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("speech provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("speech response could not be decoded: {0}")]
    Decode(String),
    #[error("transcript was empty")]
    EmptyTranscript,
    #[error("speech services are not configured")]
    Disabled,
    #[error("audio file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recorded user audio as uploaded by the browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, file_name: Option<String>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            file_name: file_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("user_voice_{}.webm", Uuid::new_v4())),
            content_type: content_type.unwrap_or_else(|| "audio/webm".to_string()),
        }
    }
}

/// Encoded speech returned by a synthesizer, not yet written anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

/// Speech saved under the audio directory and addressable by file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub file_name: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, SpeechError>;
}

/// Stands in for both directions when no speech provider is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledSpeech;

#[async_trait]
impl SpeechToText for DisabledSpeech {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, SpeechError> {
        Err(SpeechError::Disabled)
    }
}

#[async_trait]
impl TextToSpeech for DisabledSpeech {
    async fn synthesize(&self, _text: &str) -> Result<SpeechAudio, SpeechError> {
        Err(SpeechError::Disabled)
    }
}

pub struct OpenAiSpeechClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    transcription_model: String,
    speech_model: String,
    voice: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl OpenAiSpeechClient {
    pub fn from_config(config: &SpeechConfig, http: Client) -> Result<Self, SpeechError> {
        let api_key = config.api_key.clone().ok_or(SpeechError::Disabled)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            transcription_model: config.transcription_model.clone(),
            speech_model: config.speech_model.clone(),
            voice: config.voice.clone(),
            language: config.language.clone(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SpeechError::Api { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl SpeechToText for OpenAiSpeechClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, SpeechError> {
        let file = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(&clip.content_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let transcript: TranscriptionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|error| SpeechError::Decode(error.to_string()))?;

        let text = transcript.text.trim();
        if text.is_empty() {
            Err(SpeechError::EmptyTranscript)
        } else {
            Ok(text.to_string())
        }
    }
}

#[async_trait]
impl TextToSpeech for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, SpeechError> {
        let body = json!({
            "model": self.speech_model,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });
        let response = self
            .http
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(SpeechError::Decode("speech response had no audio".to_string()));
        }
        Ok(SpeechAudio { bytes: bytes.to_vec(), extension: "mp3" })
    }
}

/// Writes synthesized speech into the directory served under `/static/audio`.
#[derive(Clone, Debug)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, audio: &SpeechAudio) -> Result<SynthesizedAudio, SpeechError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("response_{}.{}", Uuid::new_v4(), audio.extension);
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &audio.bytes).await?;
        Ok(SynthesizedAudio { file_name, path })
    }
}
