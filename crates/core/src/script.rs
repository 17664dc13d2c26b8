use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptQuestion {
    pub key: String,
    pub label: String,
    pub prompt: String,
}

impl ScriptQuestion {
    pub fn new(key: impl Into<String>, label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self { key: key.into(), label: label.into(), prompt: prompt.into() }
    }
}

/// Ordered, read-only list of qualification questions.
///
/// Each question owns the answer key it populates and the column label used
/// when the finished lead is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionScript {
    questions: Vec<ScriptQuestion>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("question script must contain at least one question")]
    Empty,
    #[error("duplicate answer key `{0}` in question script")]
    DuplicateKey(String),
    #[error("duplicate column label `{0}` in question script")]
    DuplicateLabel(String),
    #[error("question `{0}` has a blank key, label or prompt")]
    BlankField(usize),
}

impl QuestionScript {
    pub fn new(questions: Vec<ScriptQuestion>) -> Result<Self, ScriptError> {
        if questions.is_empty() {
            return Err(ScriptError::Empty);
        }

        let mut keys = BTreeSet::new();
        let mut labels = BTreeSet::new();
        for (position, question) in questions.iter().enumerate() {
            if question.key.trim().is_empty()
                || question.label.trim().is_empty()
                || question.prompt.trim().is_empty()
            {
                return Err(ScriptError::BlankField(position));
            }
            if !keys.insert(question.key.as_str()) {
                return Err(ScriptError::DuplicateKey(question.key.clone()));
            }
            if !labels.insert(question.label.as_str()) {
                return Err(ScriptError::DuplicateLabel(question.label.clone()));
            }
        }

        Ok(Self { questions })
    }

    /// The built-in four question lead qualification script.
    pub fn lead_qualification() -> Self {
        Self {
            questions: vec![
                ScriptQuestion::new("name", "Name", "What is your name?"),
                ScriptQuestion::new("budget", "Budget", "What is your budget for this project?"),
                ScriptQuestion::new(
                    "timeline",
                    "Timeline",
                    "What is your ideal start date or timeline?",
                ),
                ScriptQuestion::new(
                    "notes",
                    "Notes",
                    "Do you have any other specific requirements or notes for us?",
                ),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScriptQuestion> {
        self.questions.get(index)
    }

    pub fn questions(&self) -> &[ScriptQuestion] {
        &self.questions
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|question| question.key.as_str())
    }

    /// Column labels in script order; the persisted header row.
    pub fn header(&self) -> Vec<String> {
        self.questions.iter().map(|question| question.label.clone()).collect()
    }
}

impl Default for QuestionScript {
    fn default() -> Self {
        Self::lead_qualification()
    }
}
