use std::sync::Arc;
use std::time::Duration;

use leadline_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use leadline_core::conversation::{ConversationEngine, PersistenceOutcome};
use leadline_core::errors::ApplicationError;
use leadline_core::lead::LeadStore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::phraser::{PhraseSource, ResponsePhraser};
use crate::session::{SessionId, SessionStore};
use crate::speech::{
    AudioClip, AudioStore, DisabledSpeech, SpeechToText, SynthesizedAudio, TextToSpeech,
};

pub const CLARIFICATION_TEXT: &str =
    "I'm sorry, I couldn't understand what you said. Could you please type your response?";
pub const TRANSCRIPTION_FAILED: &str = "Transcription failed.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub is_complete: bool,
    pub persistence: PersistenceOutcome,
    pub source: PhraseSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceReply {
    pub user_message: String,
    pub text: String,
    pub audio: Option<SynthesizedAudio>,
    pub is_complete: bool,
}

/// Runs chat turns for many sessions against one script, phraser and lead store.
pub struct ChatRuntime {
    engine: ConversationEngine,
    sessions: SessionStore,
    phraser: ResponsePhraser,
    store: Arc<dyn LeadStore>,
    audit: Arc<dyn AuditSink>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    audio: AudioStore,
    company_name: String,
}

impl ChatRuntime {
    pub fn new(
        engine: ConversationEngine,
        phraser: ResponsePhraser,
        store: Arc<dyn LeadStore>,
        audit: Arc<dyn AuditSink>,
        company_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            sessions: SessionStore::default(),
            phraser,
            store,
            audit,
            stt: Arc::new(DisabledSpeech),
            tts: Arc::new(DisabledSpeech),
            audio: AudioStore::new("static/audio"),
            company_name: company_name.into(),
        }
    }

    pub fn with_speech(
        mut self,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        audio: AudioStore,
    ) -> Self {
        self.stt = stt;
        self.tts = tts;
        self.audio = audio;
        self
    }

    pub fn with_session_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.sessions = SessionStore::new(idle_timeout);
        self
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn audio_store(&self) -> &AudioStore {
        &self.audio
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    /// Opening message naming the company and asking the first question verbatim.
    pub fn greeting(&self) -> String {
        let first = self.engine.script().get(0).map(|q| q.prompt.as_str()).unwrap_or_default();
        let mut chars = first.chars();
        let first = match chars.next() {
            Some(head) => head.to_lowercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        let company = self.company_name.trim();
        let stop = if company.ends_with('.') { "" } else { "." };
        format!(
            "Hello! I'm an AI assistant from {company}{stop} I'm here to ask a few quick \
             questions to qualify your lead. First, {first}"
        )
    }

    /// Drops any progress for the session and returns the greeting. The table
    /// entry is only created once the visitor answers.
    pub async fn start_session(&self, session: &SessionId) -> String {
        self.sessions.remove(session).await;
        info!(
            event_name = "chat.session.started",
            correlation_id = "session-start",
            session_id = %session,
            "conversation reset to first question"
        );
        self.greeting()
    }

    pub async fn handle_text(
        &self,
        session: &SessionId,
        answer: &str,
    ) -> Result<ChatReply, ApplicationError> {
        let audit = self.audit_context(session);
        info!(
            event_name = "chat.text.received",
            correlation_id = %audit.correlation_id,
            session_id = %session,
            answer_chars = answer.chars().count(),
            "chat message received"
        );
        self.turn(session, answer, &audit).await
    }

    pub async fn handle_voice(
        &self,
        session: &SessionId,
        clip: AudioClip,
    ) -> Result<VoiceReply, ApplicationError> {
        let audit = self.audit_context(session);
        let transcript = match self.stt.transcribe(&clip).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(error) => {
                warn!(
                    event_name = "chat.voice.transcription_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %session,
                    error = %error,
                    "could not transcribe voice message"
                );
                None
            }
        };

        let Some(transcript) = transcript else {
            self.audit.emit(AuditEvent::new(
                &audit,
                "speech.transcription_failed",
                AuditCategory::Speech,
                AuditOutcome::Rejected,
            ));
            let audio = self.speak(CLARIFICATION_TEXT, &audit).await;
            return Ok(VoiceReply {
                user_message: TRANSCRIPTION_FAILED.to_string(),
                text: CLARIFICATION_TEXT.to_string(),
                audio,
                is_complete: false,
            });
        };

        info!(
            event_name = "chat.voice.received",
            correlation_id = %audit.correlation_id,
            session_id = %session,
            answer_chars = transcript.chars().count(),
            "voice message transcribed"
        );
        let reply = self.turn(session, &transcript, &audit).await?;
        let audio = self.speak(&reply.text, &audit).await;

        Ok(VoiceReply {
            user_message: transcript,
            text: reply.text,
            audio,
            is_complete: reply.is_complete,
        })
    }

    fn audit_context(&self, session: &SessionId) -> AuditContext {
        AuditContext::new(Some(session.to_string()), Uuid::new_v4().to_string(), "chat-runtime")
    }

    /// One advance + phrase cycle under the session's lock.
    async fn turn(
        &self,
        session: &SessionId,
        answer: &str,
        audit: &AuditContext,
    ) -> Result<ChatReply, ApplicationError> {
        let slot = self.sessions.slot(session).await;
        let mut state = slot.lock().await;

        let advance = self
            .engine
            .advance(&state, answer, self.store.as_ref(), self.audit.as_ref(), audit)
            .await?;
        *state = advance.next_state.clone();

        if let PersistenceOutcome::Failed(reason) = &advance.persistence {
            error!(
                event_name = "lead.persist_failed",
                correlation_id = %audit.correlation_id,
                session_id = %session,
                error = %reason,
                "completed lead could not be stored"
            );
        }

        let phrased = self.phraser.phrase(&advance.instruction).await;
        drop(state);

        if phrased.is_fallback() {
            self.audit.emit(AuditEvent::new(
                audit,
                "phrasing.fallback",
                AuditCategory::Phrasing,
                AuditOutcome::Failed,
            ));
        }

        Ok(ChatReply {
            text: phrased.text,
            is_complete: advance.is_complete,
            persistence: advance.persistence,
            source: phrased.source,
        })
    }

    async fn speak(&self, text: &str, audit: &AuditContext) -> Option<SynthesizedAudio> {
        let saved = match self.tts.synthesize(text).await {
            Ok(audio) => self.audio.save(&audio).await,
            Err(error) => Err(error),
        };
        match saved {
            Ok(audio) => Some(audio),
            Err(error) => {
                warn!(
                    event_name = "chat.voice.synthesis_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "could not synthesize reply audio"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use leadline_core::audit::InMemoryAuditSink;
    use leadline_core::conversation::{ConversationEngine, ConversationState, PersistenceOutcome};
    use leadline_core::errors::{ApplicationError, DomainError};
    use leadline_core::lead::{InMemoryLeadStore, LeadRecord, LeadStoreError};

    use super::{ChatRuntime, CLARIFICATION_TEXT, TRANSCRIPTION_FAILED};
    use crate::llm::ScriptedLlm;
    use crate::phraser::{PhraseSource, ResponsePhraser, FALLBACK_TEXT};
    use crate::session::SessionId;
    use crate::speech::{
        AudioClip, AudioStore, DisabledSpeech, SpeechAudio, SpeechError, SpeechToText,
        TextToSpeech,
    };

    struct FixedSpeech {
        transcript: Result<String, ()>,
    }

    #[async_trait]
    impl SpeechToText for FixedSpeech {
        async fn transcribe(&self, _clip: &AudioClip) -> Result<String, SpeechError> {
            self.transcript.clone().map_err(|()| SpeechError::EmptyTranscript)
        }
    }

    #[async_trait]
    impl TextToSpeech for FixedSpeech {
        async fn synthesize(&self, _text: &str) -> Result<SpeechAudio, SpeechError> {
            Ok(SpeechAudio { bytes: b"mp3".to_vec(), extension: "mp3" })
        }
    }

    fn build(store: InMemoryLeadStore, phraser: ResponsePhraser) -> (ChatRuntime, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let runtime = ChatRuntime::new(
            ConversationEngine::default(),
            phraser,
            Arc::new(store),
            Arc::new(sink.clone()),
            "Innovate Inc.",
        );
        (runtime, sink)
    }

    fn clip() -> AudioClip {
        AudioClip::new(b"webm".to_vec(), None, None)
    }

    #[test]
    fn greeting_names_company_and_lowercases_first_question() {
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));

        assert_eq!(
            runtime.greeting(),
            "Hello! I'm an AI assistant from Innovate Inc. I'm here to ask a few quick \
             questions to qualify your lead. First, what is your name?"
        );
    }

    #[tokio::test]
    async fn full_text_conversation_persists_one_lead_and_resets() {
        let store = InMemoryLeadStore::default();
        let (runtime, _) = build(store.clone(), ResponsePhraser::literal("Innovate Inc."));
        let session = SessionId::generate();
        runtime.start_session(&session).await;

        let mut replies = Vec::new();
        for answer in ["Ada", "$5,000", "next week", "none"] {
            replies.push(runtime.handle_text(&session, answer).await.expect("turn"));
        }

        assert_eq!(replies[0].text, "What is your budget for this project?");
        assert_eq!(replies[2].text, "Do you have any other specific requirements or notes for us?");
        assert!(replies[..3].iter().all(|reply| !reply.is_complete));
        assert!(replies[3].is_complete);
        assert_eq!(replies[3].persistence, PersistenceOutcome::Persisted);
        assert_eq!(
            store.records(),
            vec![LeadRecord(vec![
                "Ada".to_string(),
                "$5,000".to_string(),
                "next week".to_string(),
                "none".to_string(),
            ])]
        );
        assert_eq!(runtime.sessions().snapshot(&session).await, Some(ConversationState::default()));
    }

    #[tokio::test]
    async fn greeting_a_new_visitor_allocates_no_session() {
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));

        for _ in 0..20 {
            runtime.start_session(&SessionId::generate()).await;
        }

        assert!(runtime.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn start_session_discards_partial_progress() {
        let store = InMemoryLeadStore::default();
        let (runtime, _) = build(store.clone(), ResponsePhraser::literal("Innovate Inc."));
        let session = SessionId::generate();
        runtime.handle_text(&session, "Ada").await.expect("turn");
        runtime.handle_text(&session, "$5,000").await.expect("turn");

        runtime.start_session(&session).await;
        let reply = runtime.handle_text(&session, "Grace").await.expect("turn");

        assert_eq!(reply.text, "What is your budget for this project?");
        let state = runtime.sessions().snapshot(&session).await.expect("state");
        assert_eq!(state.index, 1);
        assert_eq!(state.answers.get("name").map(String::as_str), Some("Grace"));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn sessions_do_not_share_progress() {
        let store = InMemoryLeadStore::default();
        let (runtime, _) = build(store.clone(), ResponsePhraser::literal("Innovate Inc."));
        let first = SessionId::generate();
        let second = SessionId::generate();

        for answer in ["Ada", "$5,000", "next week"] {
            runtime.handle_text(&first, answer).await.expect("turn");
        }
        let other = runtime.handle_text(&second, "Grace").await.expect("turn");
        let done = runtime.handle_text(&first, "none").await.expect("turn");

        assert!(!other.is_complete);
        assert!(done.is_complete);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].values()[0], "Ada");
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_are_serialized() {
        let store = InMemoryLeadStore::default();
        let (runtime, _) = build(store.clone(), ResponsePhraser::literal("Innovate Inc."));
        let runtime = Arc::new(runtime);
        let session = SessionId::generate();

        let mut handles = Vec::new();
        for k in 0..4 {
            let runtime = Arc::clone(&runtime);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                runtime.handle_text(&session, &format!("answer-{k}")).await
            }));
        }
        let mut completed = 0;
        for handle in handles {
            if handle.await.expect("join").expect("turn").is_complete {
                completed += 1;
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(store.attempts(), 1);
        let mut values = store.records()[0].values().to_vec();
        values.sort();
        assert_eq!(values, vec!["answer-0", "answer-1", "answer-2", "answer-3"]);
    }

    #[tokio::test]
    async fn storage_failure_still_closes_conversation() {
        let store = InMemoryLeadStore::failing(LeadStoreError::Unauthorized("expired".to_string()));
        let (runtime, sink) = build(store.clone(), ResponsePhraser::literal("Innovate Inc."));
        let session = SessionId::generate();

        let mut last = None;
        for answer in ["Ada", "$5,000", "next week", "none"] {
            last = Some(runtime.handle_text(&session, answer).await.expect("turn"));
        }
        let last = last.expect("reply");

        assert!(last.is_complete);
        assert!(last.persistence.is_failure());
        assert_eq!(store.attempts(), 1);
        assert!(sink.event_types().contains(&"lead.persist_failed".to_string()));
        assert_eq!(runtime.sessions().snapshot(&session).await, Some(ConversationState::default()));
    }

    #[tokio::test]
    async fn model_failure_uses_fallback_but_still_advances() {
        let llm = Arc::new(ScriptedLlm::sequence(
            Vec::new(),
            crate::llm::ScriptedReply::Stall(Duration::from_secs(5)),
        ));
        let phraser = ResponsePhraser::new(Some(llm), "Innovate Inc.", Duration::from_millis(50));
        let (runtime, sink) = build(InMemoryLeadStore::default(), phraser);
        let session = SessionId::generate();

        let reply = runtime.handle_text(&session, "Ada").await.expect("turn");

        assert_eq!(reply.text, FALLBACK_TEXT);
        assert!(matches!(reply.source, PhraseSource::Fallback(_)));
        assert_eq!(runtime.sessions().snapshot(&session).await.map(|s| s.index), Some(1));
        assert!(sink.event_types().contains(&"phrasing.fallback".to_string()));
    }

    #[tokio::test]
    async fn generated_phrasing_is_returned() {
        let phraser = ResponsePhraser::new(
            Some(Arc::new(ScriptedLlm::always("Nice to meet you, Ada! What's your budget?"))),
            "Innovate Inc.",
            Duration::from_secs(1),
        );
        let (runtime, _) = build(InMemoryLeadStore::default(), phraser);

        let reply = runtime.handle_text(&SessionId::generate(), "Ada").await.expect("turn");

        assert_eq!(reply.text, "Nice to meet you, Ada! What's your budget?");
        assert_eq!(reply.source, PhraseSource::Generated);
    }

    #[tokio::test]
    async fn corrupted_state_is_rejected_without_mutation() {
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));
        let session = SessionId::generate();
        {
            let slot = runtime.sessions().slot(&session).await;
            slot.lock().await.index = 9;
        }

        let error = runtime.handle_text(&session, "late").await.expect_err("out of range");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::StateOutOfRange { index: 9, len: 4 })
        );
        assert_eq!(runtime.sessions().snapshot(&session).await.map(|s| s.index), Some(9));
    }

    #[tokio::test]
    async fn failed_transcription_returns_clarification_and_keeps_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let speech = Arc::new(FixedSpeech { transcript: Err(()) });
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));
        let runtime =
            runtime.with_speech(speech.clone(), speech, AudioStore::new(dir.path().to_path_buf()));
        let session = SessionId::generate();
        runtime.handle_text(&session, "Ada").await.expect("turn");

        let reply = runtime.handle_voice(&session, clip()).await.expect("voice");

        assert_eq!(reply.user_message, TRANSCRIPTION_FAILED);
        assert_eq!(reply.text, CLARIFICATION_TEXT);
        assert!(!reply.is_complete);
        assert!(reply.audio.is_some(), "clarification is still spoken");
        let state = runtime.sessions().snapshot(&session).await.expect("state");
        assert_eq!(state.index, 1);
        assert_eq!(state.answers.len(), 1);
    }

    #[tokio::test]
    async fn voice_turn_advances_like_text_and_saves_audio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let speech = Arc::new(FixedSpeech { transcript: Ok("My name is Ada".to_string()) });
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));
        let runtime =
            runtime.with_speech(speech.clone(), speech, AudioStore::new(dir.path().to_path_buf()));
        let session = SessionId::generate();

        let reply = runtime.handle_voice(&session, clip()).await.expect("voice");

        assert_eq!(reply.user_message, "My name is Ada");
        assert_eq!(reply.text, "What is your budget for this project?");
        let audio = reply.audio.expect("audio saved");
        assert!(audio.path.starts_with(dir.path()));
        assert_eq!(
            runtime.sessions().snapshot(&session).await.and_then(|s| s.answers.get("name").cloned()),
            Some("My name is Ada".to_string())
        );
    }

    #[tokio::test]
    async fn synthesis_failure_leaves_audio_empty() {
        let (runtime, _) =
            build(InMemoryLeadStore::default(), ResponsePhraser::literal("Innovate Inc."));
        let runtime = runtime.with_speech(
            Arc::new(FixedSpeech { transcript: Ok("Ada".to_string()) }),
            Arc::new(DisabledSpeech),
            AudioStore::new("unused"),
        );

        let reply = runtime.handle_voice(&SessionId::generate(), clip()).await.expect("voice");

        assert!(reply.audio.is_none());
        assert_eq!(reply.text, "What is your budget for this project?");
    }
}
