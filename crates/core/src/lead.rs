use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::script::QuestionScript;

/// Answer values of one completed conversation, in script order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord(pub Vec<String>);

impl LeadRecord {
    /// Builds the record in script order; unanswered keys become empty cells.
    pub fn from_answers(script: &QuestionScript, answers: &BTreeMap<String, String>) -> Self {
        Self(script.keys().map(|key| answers.get(key).cloned().unwrap_or_default()).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LeadStoreError {
    #[error("lead store rejected credentials: {0}")]
    Unauthorized(String),
    #[error("lead sheet `{0}` was not found")]
    SheetNotFound(String),
    #[error("lead store backend failure: {0}")]
    Backend(String),
}

/// Destination for finalized leads.
///
/// Called at most once per completed conversation and never retried by the
/// caller.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn append(&self, record: &LeadRecord) -> Result<(), LeadStoreError>;
}

#[async_trait]
impl<T> LeadStore for Arc<T>
where
    T: LeadStore + ?Sized,
{
    async fn append(&self, record: &LeadRecord) -> Result<(), LeadStoreError> {
        (**self).append(record).await
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLeadStore {
    records: Arc<Mutex<Vec<LeadRecord>>>,
    failure: Option<LeadStoreError>,
    attempts: Arc<Mutex<usize>>,
}

impl InMemoryLeadStore {
    /// A store whose every append fails with `error`; attempts are still counted.
    pub fn failing(error: LeadStoreError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    pub fn records(&self) -> Vec<LeadRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn attempts(&self) -> usize {
        match self.attempts.lock() {
            Ok(attempts) => *attempts,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn append(&self, record: &LeadRecord) -> Result<(), LeadStoreError> {
        match self.attempts.lock() {
            Ok(mut attempts) => *attempts += 1,
            Err(poisoned) => *poisoned.into_inner() += 1,
        }

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::lead::{InMemoryLeadStore, LeadRecord, LeadStore, LeadStoreError};
    use crate::script::QuestionScript;

    #[test]
    fn record_follows_script_order_not_insertion_order() {
        let script = QuestionScript::lead_qualification();
        let mut answers = BTreeMap::new();
        answers.insert("timeline".to_owned(), "next week".to_owned());
        answers.insert("notes".to_owned(), "none".to_owned());
        answers.insert("name".to_owned(), "Ada".to_owned());
        answers.insert("budget".to_owned(), "$5,000".to_owned());

        let record = LeadRecord::from_answers(&script, &answers);

        assert_eq!(record.values(), ["Ada", "$5,000", "next week", "none"]);
    }

    #[test]
    fn missing_answers_become_empty_cells() {
        let script = QuestionScript::lead_qualification();
        let mut answers = BTreeMap::new();
        answers.insert("name".to_owned(), "Ada".to_owned());

        let record = LeadRecord::from_answers(&script, &answers);

        assert_eq!(record.len(), 4);
        assert_eq!(record.values(), ["Ada", "", "", ""]);
    }

    #[tokio::test]
    async fn failing_store_counts_attempts_without_keeping_records() {
        let store = InMemoryLeadStore::failing(LeadStoreError::Backend("offline".to_owned()));

        let result = store.append(&LeadRecord(vec!["Ada".to_owned()])).await;

        assert_eq!(result, Err(LeadStoreError::Backend("offline".to_owned())));
        assert_eq!(store.attempts(), 1);
        assert!(store.records().is_empty());
    }
}
