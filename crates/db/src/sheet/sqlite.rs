use async_trait::async_trait;
use sqlx::Row;

use super::{SheetBackend, SheetError};
use crate::DbPool;

/// A named sheet stored as JSON-encoded rows in the `sheet_row` table.
#[derive(Clone)]
pub struct SqliteSheet {
    pool: DbPool,
    name: String,
}

impl SqliteSheet {
    pub fn new(pool: DbPool, name: impl Into<String>) -> Self {
        Self { pool, name: name.into() }
    }

    pub async fn rows(&self) -> Result<Vec<Vec<String>>, SheetError> {
        let rows = sqlx::query(
            "SELECT cells_json FROM sheet_row WHERE sheet_name = ? ORDER BY row_number ASC",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_cells(&row.try_get::<String, _>("cells_json")?)).collect()
    }

    pub async fn row_count(&self) -> Result<u32, SheetError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM sheet_row WHERE sheet_name = ?")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?
                .try_get("count")?;
        u32::try_from(count).map_err(|_| SheetError::Decode(format!("row count {count}")))
    }
}

fn encode_cells(values: &[String]) -> Result<String, SheetError> {
    serde_json::to_string(values).map_err(|error| SheetError::Decode(error.to_string()))
}

fn decode_cells(raw: &str) -> Result<Vec<String>, SheetError> {
    serde_json::from_str(raw).map_err(|error| SheetError::Decode(error.to_string()))
}

#[async_trait]
impl SheetBackend for SqliteSheet {
    fn sheet_name(&self) -> &str {
        &self.name
    }

    async fn row_values(&self, row: u32) -> Result<Option<Vec<String>>, SheetError> {
        let found = sqlx::query(
            "SELECT cells_json FROM sheet_row WHERE sheet_name = ? AND row_number = ?",
        )
        .bind(&self.name)
        .bind(i64::from(row))
        .fetch_optional(&self.pool)
        .await?;

        match found {
            Some(row) => decode_cells(&row.try_get::<String, _>("cells_json")?).map(Some),
            None => Ok(None),
        }
    }

    async fn is_empty(&self) -> Result<bool, SheetError> {
        Ok(self.row_count().await? == 0)
    }

    async fn insert_row(&self, values: &[String], at_row: u32) -> Result<(), SheetError> {
        let cells = encode_cells(values)?;
        let at_row = i64::from(at_row.max(1));
        let mut tx = self.pool.begin().await?;

        // Shift through negative numbers so the primary key never collides mid-update.
        sqlx::query(
            "UPDATE sheet_row SET row_number = -(row_number + 1)
             WHERE sheet_name = ? AND row_number >= ?",
        )
        .bind(&self.name)
        .bind(at_row)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE sheet_row SET row_number = -row_number WHERE sheet_name = ? AND row_number < 0",
        )
        .bind(&self.name)
        .execute(&mut *tx)
        .await?;

        let max_row: i64 = sqlx::query(
            "SELECT IFNULL(MAX(row_number), 0) AS max_row FROM sheet_row WHERE sheet_name = ?",
        )
        .bind(&self.name)
        .fetch_one(&mut *tx)
        .await?
        .try_get("max_row")?;

        sqlx::query("INSERT INTO sheet_row (sheet_name, row_number, cells_json) VALUES (?, ?, ?)")
            .bind(&self.name)
            .bind(at_row.min(max_row + 1))
            .bind(cells)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), SheetError> {
        sqlx::query(
            "INSERT INTO sheet_row (sheet_name, row_number, cells_json)
             SELECT ?, IFNULL(MAX(row_number), 0) + 1, ? FROM sheet_row WHERE sheet_name = ?",
        )
        .bind(&self.name)
        .bind(encode_cells(values)?)
        .bind(&self.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
