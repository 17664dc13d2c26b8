use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{SheetBackend, SheetError};

#[derive(Default)]
struct SheetState {
    rows: Vec<Vec<String>>,
    next_write_failure: Option<SheetError>,
}

/// Process-local sheet; the `memory` backend and the fixture for store tests.
#[derive(Clone, Default)]
pub struct InMemorySheet {
    name: String,
    state: Arc<Mutex<SheetState>>,
}

impl InMemorySheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Arc::default() }
    }

    pub fn with_rows(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        let sheet = Self::new(name);
        sheet.with_state(|state| state.rows = rows);
        sheet
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.with_state(|state| state.rows.clone())
    }

    /// Fails the next insert or append with `error`.
    pub fn fail_with(&self, error: SheetError) {
        self.with_state(|state| state.next_write_failure = Some(error));
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SheetState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl SheetBackend for InMemorySheet {
    fn sheet_name(&self) -> &str {
        &self.name
    }

    async fn row_values(&self, row: u32) -> Result<Option<Vec<String>>, SheetError> {
        let index = row.checked_sub(1).map(|index| index as usize);
        Ok(self.with_state(|state| index.and_then(|index| state.rows.get(index).cloned())))
    }

    async fn is_empty(&self) -> Result<bool, SheetError> {
        Ok(self.with_state(|state| state.rows.is_empty()))
    }

    async fn insert_row(&self, values: &[String], at_row: u32) -> Result<(), SheetError> {
        self.with_state(|state| {
            if let Some(error) = state.next_write_failure.take() {
                return Err(error);
            }
            let index = (at_row.max(1) as usize - 1).min(state.rows.len());
            state.rows.insert(index, values.to_vec());
            Ok(())
        })
    }

    async fn append_row(&self, values: &[String]) -> Result<(), SheetError> {
        self.with_state(|state| {
            if let Some(error) = state.next_write_failure.take() {
                return Err(error);
            }
            state.rows.push(values.to_vec());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::InMemorySheet;
    use crate::sheet::SheetBackend;

    #[tokio::test]
    async fn rows_are_addressed_from_one() {
        let sheet = InMemorySheet::with_rows("Leads", vec![vec!["a".to_owned()]]);

        assert_eq!(sheet.row_values(1).await.expect("row 1"), Some(vec!["a".to_owned()]));
        assert_eq!(sheet.row_values(0).await.expect("row 0"), None);
        assert_eq!(sheet.row_values(2).await.expect("row 2"), None);
    }

    #[tokio::test]
    async fn insert_past_end_appends() {
        let sheet = InMemorySheet::new("Leads");

        sheet.insert_row(&["x".to_owned()], 10).await.expect("insert");

        assert_eq!(sheet.rows(), vec![vec!["x".to_owned()]]);
    }
}
