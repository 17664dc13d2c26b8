//! Row-oriented spreadsheet storage for finished leads.
//!
//! A [`SheetBackend`] exposes the handful of row operations the lead store
//! needs; [`SpreadsheetLeadStore`] layers the header-row contract on top so
//! every backend keeps row 1 equal to the script's column labels.

use async_trait::async_trait;
use leadline_core::lead::{LeadRecord, LeadStore, LeadStoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod google;
pub mod google_auth;
pub mod memory;
pub mod sqlite;

pub use google::GoogleSheet;
pub use google_auth::{GoogleAuth, ServiceAccountKey};
pub use memory::InMemorySheet;
pub use sqlite::SqliteSheet;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet access was rejected: {0}")]
    Unauthorized(String),
    #[error("sheets credentials are unusable: {0}")]
    Credentials(String),
    #[error("sheet `{0}` was not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("sheets api request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sheets api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<SheetError> for LeadStoreError {
    fn from(error: SheetError) -> Self {
        match error {
            SheetError::Unauthorized(message) | SheetError::Credentials(message) => {
                Self::Unauthorized(message)
            }
            SheetError::NotFound(sheet) => Self::SheetNotFound(sheet),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Rows are 1-based, matching spreadsheet addressing.
#[async_trait]
pub trait SheetBackend: Send + Sync {
    fn sheet_name(&self) -> &str;
    async fn row_values(&self, row: u32) -> Result<Option<Vec<String>>, SheetError>;
    async fn is_empty(&self) -> Result<bool, SheetError>;
    async fn insert_row(&self, values: &[String], at_row: u32) -> Result<(), SheetError>;
    async fn append_row(&self, values: &[String]) -> Result<(), SheetError>;
}

pub struct SpreadsheetLeadStore<B> {
    backend: B,
    header: Vec<String>,
    write_lock: Mutex<()>,
}

impl<B: SheetBackend> SpreadsheetLeadStore<B> {
    pub fn new(backend: B, header: Vec<String>) -> Self {
        Self { backend, header, write_lock: Mutex::new(()) }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    async fn ensure_header(&self) -> Result<(), SheetError> {
        let empty = self.backend.is_empty().await?;
        let first_row = if empty { None } else { self.backend.row_values(1).await? };
        if first_row.as_deref() == Some(self.header.as_slice()) {
            return Ok(());
        }

        info!(
            event_name = "lead.header_inserted",
            sheet = self.backend.sheet_name(),
            empty,
            "header row missing or stale, inserting at row 1"
        );
        self.backend.insert_row(&self.header, 1).await
    }
}

#[async_trait]
impl<B: SheetBackend> LeadStore for SpreadsheetLeadStore<B> {
    async fn append(&self, record: &LeadRecord) -> Result<(), LeadStoreError> {
        let _guard = self.write_lock.lock().await;

        let result = async {
            self.ensure_header().await?;
            self.backend.append_row(record.values()).await
        }
        .await;

        if let Err(error) = &result {
            warn!(
                event_name = "lead.sheet_write_failed",
                sheet = self.backend.sheet_name(),
                error = %error,
                "could not append lead row"
            );
        }
        result.map_err(LeadStoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leadline_core::lead::{LeadRecord, LeadStore, LeadStoreError};
    use leadline_core::script::QuestionScript;

    use super::{InMemorySheet, SheetBackend, SheetError, SpreadsheetLeadStore};

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    fn header() -> Vec<String> {
        QuestionScript::lead_qualification().header()
    }

    #[tokio::test]
    async fn empty_sheet_gets_header_before_first_lead() {
        let store = SpreadsheetLeadStore::new(InMemorySheet::new("Leads"), header());

        store
            .append(&LeadRecord(row(&["Ada", "$5,000", "next week", "none"])))
            .await
            .expect("append");

        assert_eq!(
            store.backend().rows(),
            vec![
                row(&["Name", "Budget", "Timeline", "Notes"]),
                row(&["Ada", "$5,000", "next week", "none"]),
            ]
        );
    }

    #[tokio::test]
    async fn header_is_written_once_across_appends() {
        let store = SpreadsheetLeadStore::new(InMemorySheet::new("Leads"), header());

        store.append(&LeadRecord(row(&["Ada", "1", "2", "3"]))).await.expect("first");
        store.append(&LeadRecord(row(&["Grace", "4", "5", "6"]))).await.expect("second");

        let rows = store.backend().rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], header());
        assert_eq!(rows[2][0], "Grace");
    }

    #[tokio::test]
    async fn stale_header_is_pushed_down_not_overwritten() {
        let sheet = InMemorySheet::with_rows(
            "Leads",
            vec![row(&["Old", "Columns"]), row(&["legacy", "row"])],
        );
        let store = SpreadsheetLeadStore::new(sheet, header());

        store.append(&LeadRecord(row(&["Ada", "1", "2", "3"]))).await.expect("append");

        let rows = store.backend().rows();
        assert_eq!(rows[0], header());
        assert_eq!(rows[1], row(&["Old", "Columns"]));
        assert_eq!(rows[3], row(&["Ada", "1", "2", "3"]));
    }

    #[tokio::test]
    async fn concurrent_appends_write_a_single_header() {
        let store = Arc::new(SpreadsheetLeadStore::new(InMemorySheet::new("Leads"), header()));

        let mut handles = Vec::new();
        for k in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(&LeadRecord(row(&[&format!("lead-{k}"), "", "", ""]))).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        let rows = store.backend().rows();
        assert_eq!(rows.len(), 9);
        assert_eq!(rows.iter().filter(|r| **r == header()).count(), 1);
    }

    #[tokio::test]
    async fn backend_errors_map_to_lead_store_kinds() {
        let sheet = InMemorySheet::new("Leads");
        sheet.fail_with(SheetError::Unauthorized("token expired".to_owned()));
        let store = SpreadsheetLeadStore::new(sheet, header());

        let error = store
            .append(&LeadRecord(row(&["Ada", "", "", ""])))
            .await
            .expect_err("append should fail");

        assert_eq!(error, LeadStoreError::Unauthorized("token expired".to_owned()));
        assert!(store.backend().is_empty().await.expect("is_empty"));
    }
}
