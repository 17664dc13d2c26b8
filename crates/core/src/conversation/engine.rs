use std::sync::Arc;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::conversation::states::{
    Advance, ConversationState, Instruction, PersistenceOutcome, Transition,
};
use crate::errors::DomainError;
use crate::lead::{LeadRecord, LeadStore};
use crate::script::QuestionScript;

/// Walks a session through the question script, one answer at a time.
///
/// The cycle is `AwaitingAnswer[0] -> .. -> AwaitingAnswer[N-1] -> Complete`,
/// and `Complete` immediately re-enters `AwaitingAnswer[0]`.
#[derive(Clone, Debug)]
pub struct ConversationEngine {
    script: Arc<QuestionScript>,
}

impl ConversationEngine {
    pub fn new(script: QuestionScript) -> Self {
        Self { script: Arc::new(script) }
    }

    pub fn script(&self) -> &QuestionScript {
        &self.script
    }

    pub fn initial_state(&self) -> ConversationState {
        ConversationState::default()
    }

    /// Applies `answer` to `state` without touching the lead store.
    pub fn step(
        &self,
        state: &ConversationState,
        answer: &str,
    ) -> Result<Transition, DomainError> {
        let len = self.script.len();
        if state.index > len {
            return Err(DomainError::StateOutOfRange { index: state.index, len });
        }

        let mut answers = state.answers.clone();
        if let Some(question) = self.script.get(state.index) {
            answers.insert(question.key.clone(), answer.to_owned());
        }

        let next_index = state.index + 1;
        if let Some(next) = self.script.get(next_index) {
            return Ok(Transition {
                instruction: Instruction::AskQuestion {
                    previous_answer: answer.to_owned(),
                    question: next.prompt.clone(),
                },
                next_state: ConversationState { index: next_index, answers },
                reached_index: next_index,
                lead: None,
            });
        }

        let summary = self
            .script
            .questions()
            .iter()
            .map(|question| {
                (question.label.clone(), answers.get(&question.key).cloned().unwrap_or_default())
            })
            .collect();
        let lead = LeadRecord::from_answers(&self.script, &answers);

        Ok(Transition {
            instruction: Instruction::Close { final_answer: answer.to_owned(), summary },
            next_state: self.initial_state(),
            reached_index: next_index,
            lead: Some(lead),
        })
    }

    /// Applies `answer` and, when it completes the script, hands the lead to
    /// `store` exactly once before returning.
    ///
    /// A store failure is reported in [`Advance::persistence`]; the
    /// conversation still completes and resets.
    pub async fn advance<S, A>(
        &self,
        state: &ConversationState,
        answer: &str,
        store: &S,
        sink: &A,
        audit: &AuditContext,
    ) -> Result<Advance, DomainError>
    where
        S: LeadStore + ?Sized,
        A: AuditSink + ?Sized,
    {
        let transition = match self.step(state, answer) {
            Ok(transition) => transition,
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "conversation.answer_rejected",
                        AuditCategory::Conversation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
                return Err(error);
            }
        };

        let field = self.script.get(state.index).map(|q| q.key.clone()).unwrap_or_default();
        sink.emit(
            AuditEvent::new(
                audit,
                "conversation.answer_recorded",
                AuditCategory::Conversation,
                AuditOutcome::Success,
            )
            .with_metadata("field", field)
            .with_metadata("from_index", state.index.to_string())
            .with_metadata("reached_index", transition.reached_index.to_string()),
        );

        let persistence = match &transition.lead {
            None => PersistenceOutcome::NotAttempted,
            Some(lead) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "conversation.completed",
                        AuditCategory::Conversation,
                        AuditOutcome::Success,
                    )
                    .with_metadata("fields", lead.len().to_string()),
                );
                self.persist(lead, store, sink, audit).await
            }
        };

        let is_complete = transition.is_complete();
        Ok(Advance {
            instruction: transition.instruction,
            next_state: transition.next_state,
            reached_index: transition.reached_index,
            is_complete,
            persistence,
        })
    }

    async fn persist<S, A>(
        &self,
        lead: &LeadRecord,
        store: &S,
        sink: &A,
        audit: &AuditContext,
    ) -> PersistenceOutcome
    where
        S: LeadStore + ?Sized,
        A: AuditSink + ?Sized,
    {
        match store.append(lead).await {
            Ok(()) => {
                sink.emit(AuditEvent::new(
                    audit,
                    "lead.persisted",
                    AuditCategory::Persistence,
                    AuditOutcome::Success,
                ));
                PersistenceOutcome::Persisted
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "lead.persist_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                PersistenceOutcome::Failed(error.to_string())
            }
        }
    }
}

impl Default for ConversationEngine {
    fn default() -> Self {
        Self::new(QuestionScript::lead_qualification())
    }
}
