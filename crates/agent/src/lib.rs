//! Conversation runtime for the lead qualification agent.
//!
//! - `llm`: model clients behind the [`llm::LlmClient`] trait
//! - `phraser`: turns engine instructions into user-facing text, with a
//!   fixed fallback when the model is unavailable
//! - `speech`: transcription and synthesis for the voice channel
//! - `session`: per-session conversation state
//! - `runtime`: [`runtime::ChatRuntime`], one text or voice turn at a time
//!
//! The model only words replies. Which question comes next, and when a lead
//! is complete, is decided by the conversation engine in `leadline-core`.

pub mod llm;
pub mod phraser;
pub mod runtime;
pub mod session;
pub mod speech;

pub use llm::{client_from_config, LlmClient, LlmError};
pub use phraser::{PhraseSource, Phrased, PhrasingUnavailable, ResponsePhraser};
pub use runtime::{ChatReply, ChatRuntime, VoiceReply};
pub use session::{SessionId, SessionStore};
pub use speech::{
    AudioClip, AudioStore, DisabledSpeech, OpenAiSpeechClient, SpeechAudio, SpeechError,
    SpeechToText, SynthesizedAudio, TextToSpeech,
};
