use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lead::LeadRecord;
use crate::script::QuestionScript;

/// Progress of one session through the question script.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub index: usize,
    pub answers: BTreeMap<String, String>,
}

impl ConversationState {
    pub fn is_initial(&self) -> bool {
        self.index == 0 && self.answers.is_empty()
    }

    pub fn phase(&self, script: &QuestionScript) -> ConversationPhase {
        if self.index < script.len() {
            ConversationPhase::AwaitingAnswer { index: self.index }
        } else {
            ConversationPhase::Complete
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationPhase {
    AwaitingAnswer { index: usize },
    Complete,
}

/// What the phraser should say next, and the context it may use for tone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    AskQuestion { previous_answer: String, question: String },
    Close { final_answer: String, summary: Vec<(String, String)> },
}

impl Instruction {
    /// The literal question text, when the instruction asks one.
    pub fn question(&self) -> Option<&str> {
        match self {
            Self::AskQuestion { question, .. } => Some(question),
            Self::Close { .. } => None,
        }
    }

    pub fn render_prompt(&self) -> String {
        match self {
            Self::AskQuestion { previous_answer, question } => format!(
                "The user just answered saying: '{previous_answer}'. Now, ask them the next \
                 question in a friendly and conversational way: '{question}'"
            ),
            Self::Close { final_answer, summary } => {
                let details = summary
                    .iter()
                    .map(|(label, value)| format!("{label}: {value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "The user has answered all qualification questions. Their final note was: \
                     '{final_answer}'. Thank them for their time, let them know their information \
                     has been received, and that a team member will be in touch shortly. Here is \
                     a summary of their info: {details}."
                )
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceOutcome {
    NotAttempted,
    Persisted,
    Failed(String),
}

impl PersistenceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Pure result of applying one answer, before any side effect runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub instruction: Instruction,
    pub next_state: ConversationState,
    pub reached_index: usize,
    pub lead: Option<LeadRecord>,
}

impl Transition {
    pub fn is_complete(&self) -> bool {
        self.lead.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advance {
    pub instruction: Instruction,
    pub next_state: ConversationState,
    /// Index reached by this answer, before the reset that follows completion.
    pub reached_index: usize,
    pub is_complete: bool,
    pub persistence: PersistenceOutcome,
}
