use async_trait::async_trait;
use leadline_core::config::SheetsConfig;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::google_auth::GoogleAuth;
use super::{SheetBackend, SheetError};

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// One worksheet of a Google spreadsheet, addressed through the Sheets v4
/// REST API with a bearer token from [`GoogleAuth`].
#[derive(Clone)]
pub struct GoogleSheet {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    sheet_name: String,
    auth: GoogleAuth,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

impl GoogleSheet {
    pub fn new(
        client: Client,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
        auth: GoogleAuth,
    ) -> Self {
        Self {
            client,
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            auth,
        }
    }

    /// Worksheet named by `sheets.sheet_name`, authorized by the configured
    /// access token or service-account key file.
    pub fn from_config(config: &SheetsConfig, client: Client) -> Result<Self, SheetError> {
        let spreadsheet_id = config.spreadsheet_id.clone().ok_or_else(|| {
            SheetError::Credentials("sheets.spreadsheet_id is required".to_string())
        })?;
        let auth = GoogleAuth::from_config(config, client.clone())?;
        let mut sheet = Self::new(client, spreadsheet_id, config.sheet_name.clone(), auth);
        if let Some(base_url) = &config.base_url {
            sheet = sheet.with_base_url(base_url.clone());
        }
        Ok(sheet)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SheetError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|error| SheetError::Decode(format!("invalid sheets base url: {error}")))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::Decode("sheets base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("spreadsheets")
            .extend(segments);
        Ok(url)
    }

    fn quoted_range(&self, cells: &str) -> String {
        let name = self.sheet_name.replace('\'', "''");
        if cells.is_empty() {
            format!("'{name}'")
        } else {
            format!("'{name}'!{cells}")
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SheetError> {
        let token = self.auth.bearer().await?;
        let response = request.bearer_auth(token.expose_secret()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "sheets api request rejected");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SheetError::Unauthorized(body),
            StatusCode::NOT_FOUND => SheetError::NotFound(self.sheet_name.clone()),
            StatusCode::BAD_REQUEST if body.contains("Unable to parse range") => {
                SheetError::NotFound(self.sheet_name.clone())
            }
            _ => SheetError::Api { status: status.as_u16(), body },
        })
    }

    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.url(&[self.spreadsheet_id.as_str(), "values", range])?;
        let response = self.send(self.client.get(url)).await?;
        let range: ValueRange =
            response.json().await.map_err(|error| SheetError::Decode(error.to_string()))?;
        Ok(range.values)
    }

    async fn sheet_id(&self) -> Result<i64, SheetError> {
        let url = self.url(&[self.spreadsheet_id.as_str()])?;
        let request =
            self.client.get(url).query(&[("fields", "sheets.properties(sheetId,title)")]);
        let metadata: SpreadsheetMetadata = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|error| SheetError::Decode(error.to_string()))?;

        metadata
            .sheets
            .into_iter()
            .find(|sheet| sheet.properties.title == self.sheet_name)
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| SheetError::NotFound(self.sheet_name.clone()))
    }
}

#[async_trait]
impl SheetBackend for GoogleSheet {
    fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    async fn row_values(&self, row: u32) -> Result<Option<Vec<String>>, SheetError> {
        let range = self.quoted_range(&format!("{row}:{row}"));
        Ok(self.values(&range).await?.into_iter().next())
    }

    async fn is_empty(&self) -> Result<bool, SheetError> {
        let range = self.quoted_range("");
        Ok(self.values(&range).await?.iter().all(|row| row.is_empty()))
    }

    async fn insert_row(&self, values: &[String], at_row: u32) -> Result<(), SheetError> {
        let at_row = at_row.max(1);
        let sheet_id = self.sheet_id().await?;

        let batch_update = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = self.url(&[batch_update.as_str()])?;
        let body = json!({
            "requests": [{
                "insertDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": at_row - 1,
                        "endIndex": at_row,
                    },
                    "inheritFromBefore": false,
                }
            }]
        });
        self.send(self.client.post(url).json(&body)).await?;

        let range = self.quoted_range(&format!("A{at_row}"));
        let url = self.url(&[self.spreadsheet_id.as_str(), "values", range.as_str()])?;
        let request = self
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [values] }));
        self.send(request).await?;
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), SheetError> {
        let append = format!("{}:append", self.quoted_range("A1"));
        let url = self.url(&[self.spreadsheet_id.as_str(), "values", append.as_str()])?;
        let request = self
            .client
            .post(url)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "majorDimension": "ROWS", "values": [values] }));
        self.send(request).await?;
        Ok(())
    }
}
