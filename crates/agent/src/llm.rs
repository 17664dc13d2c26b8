use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leadline_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm response contained no text")]
    EmptyResponse,
    #[error("llm client is not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Builds the client for the configured provider; `Disabled` yields `None`.
pub fn client_from_config(
    config: &LlmConfig,
    http: Client,
) -> Result<Option<Arc<dyn LlmClient>>, LlmError> {
    let api_key = config.api_key.clone();
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Disabled => return Ok(None),
        LlmProvider::Gemini => {
            let api_key = api_key
                .ok_or_else(|| LlmError::NotConfigured("gemini requires an api key".to_string()))?;
            let base_url =
                config.base_url.clone().unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
            Arc::new(GeminiClient::new(http, base_url, config.model.clone(), api_key))
        }
        LlmProvider::OpenAi => {
            if api_key.is_none() {
                return Err(LlmError::NotConfigured("openai requires an api key".to_string()));
            }
            let base_url =
                config.base_url.clone().unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            Arc::new(OpenAiCompatibleClient::new(http, base_url, config.model.clone(), api_key))
        }
        LlmProvider::Ollama => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                LlmError::NotConfigured("ollama requires a base url".to_string())
            })?;
            Arc::new(OpenAiCompatibleClient::new(http, base_url, config.model.clone(), api_key))
        }
    };
    Ok(Some(client))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::Api { status: status.as_u16(), body })
    }
}

fn non_blank(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        Err(LlmError::EmptyResponse)
    } else {
        Ok(text)
    }
}

/// Google Generative Language API (`models/{model}:generateContent`).
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self { http, base_url: base_url.into(), model: model.into(), api_key }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http
            .post(url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await?;
        let payload: GenerateContentResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        let text = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content.parts.into_iter().filter_map(|part| part.text).collect::<String>()
            })
            .unwrap_or_default();
        non_blank(text)
    }
}

/// Any `/chat/completions` endpoint: OpenAI itself, or Ollama's compatible API.
pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { http, base_url: base_url.into(), model: model.into(), api_key }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let mut request = self.http.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let payload: ChatCompletionResponse = ensure_success(request.send().await?)
            .await?
            .json()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        non_blank(text)
    }
}

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
    Stall(Duration),
}

/// Deterministic stand-in for a model: replays queued replies, then repeats
/// the fallback reply.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedLlm {
    pub fn always(text: impl Into<String>) -> Self {
        Self::sequence(Vec::new(), ScriptedReply::Text(text.into()))
    }

    pub fn sequence(replies: Vec<ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(system, prompt)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_reply(&self) -> ScriptedReply {
        let mut replies = match self.replies.lock() {
            Ok(replies) => replies,
            Err(poisoned) => poisoned.into_inner(),
        };
        replies.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((system.to_string(), prompt.to_string())),
            Err(poisoned) => poisoned.into_inner().push((system.to_string(), prompt.to_string())),
        }

        match self.next_reply() {
            ScriptedReply::Text(text) => non_blank(text),
            ScriptedReply::Error(body) => Err(LlmError::Api { status: 500, body }),
            ScriptedReply::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Err(LlmError::EmptyResponse)
            }
        }
    }
}
