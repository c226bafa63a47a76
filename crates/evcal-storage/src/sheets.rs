//! Google Sheets (API v4) table adapter.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{HttpClientConfig, StoreError, TableSnapshot, TableStore};

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub access_token: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct GoogleSheetsStore {
    client: reqwest::Client,
    config: SheetsConfig,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    #[serde(default)]
    updates: Option<UpdateSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSummary {
    #[serde(default)]
    updated_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
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

impl GoogleSheetsStore {
    pub fn new(config: SheetsConfig, http: &HttpClientConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: http.build_client()?,
            config,
        })
    }

    /// A1 range scoped to the configured worksheet, e.g. `'行事曆總表'!1:1`.
    fn sheet_range(&self, cells: &str) -> String {
        let quoted = format!("'{}'", self.config.sheet_name.replace('\'', "''"));
        if cells.is_empty() {
            quoted
        } else {
            format!("{quoted}!{cells}")
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|err| StoreError::Malformed(format!("invalid sheets base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Malformed("sheets base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, StoreError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if status == StatusCode::BAD_REQUEST && body.contains("Unable to parse range") {
                return Err(StoreError::SheetNotFound(self.config.sheet_name.clone()));
            }
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn sheet_id(&self) -> Result<i64, StoreError> {
        let url = self.endpoint(&["spreadsheets", &self.config.spreadsheet_id])?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .query(&[("fields", "sheets.properties")])
            .send()
            .await?;
        let props: SpreadsheetProperties = self.decode(resp).await?;
        props
            .sheets
            .into_iter()
            .find(|s| s.properties.title == self.config.sheet_name)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| StoreError::SheetNotFound(self.config.sheet_name.clone()))
    }
}

#[async_trait]
impl TableStore for GoogleSheetsStore {
    fn table_id(&self) -> String {
        format!(
            "sheets:{}/{}",
            self.config.spreadsheet_id, self.config.sheet_name
        )
    }

    async fn read_table(&self) -> Result<TableSnapshot, StoreError> {
        let range = self.sheet_range("");
        let url = self.endpoint(&["spreadsheets", &self.config.spreadsheet_id, "values", &range])?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("majorDimension", "ROWS"),
                ("valueRenderOption", "FORMATTED_VALUE"),
            ])
            .send()
            .await?;
        let body: ValueRange = self.decode(resp).await?;
        let rows = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect::<Vec<Vec<String>>>();
        debug!(table = %self.table_id(), rows = rows.len(), "read sheet values");
        Ok(TableSnapshot::new(rows))
    }

    async fn append_row(&self, cells: Vec<String>) -> Result<usize, StoreError> {
        let range = format!("{}:append", self.sheet_range("A1"));
        let url = self.endpoint(&["spreadsheets", &self.config.spreadsheet_id, "values", &range])?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": [cells] }))
            .send()
            .await?;
        let body: AppendResponse = self.decode(resp).await?;
        let updated_range = body
            .updates
            .and_then(|u| u.updated_range)
            .ok_or_else(|| StoreError::Malformed("append response has no updatedRange".into()))?;
        let row_index = parse_updated_row(&updated_range).ok_or_else(|| {
            StoreError::Malformed(format!("cannot read row from range {updated_range}"))
        })?;
        debug!(table = %self.table_id(), row_index, "appended sheet row");
        Ok(row_index)
    }

    async fn set_header_row(&self, names: Vec<String>) -> Result<(), StoreError> {
        let range = self.sheet_range("1:1");
        let url = self.endpoint(&["spreadsheets", &self.config.spreadsheet_id, "values", &range])?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.config.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [names] }))
            .send()
            .await?;
        let _: JsonValue = self.decode(resp).await?;
        Ok(())
    }

    async fn format_cell_wrap(&self, row_index: usize, col_index: usize) -> Result<(), StoreError> {
        let sheet_id = self.sheet_id().await?;
        let op = format!("{}:batchUpdate", self.config.spreadsheet_id);
        let url = self.endpoint(&["spreadsheets", &op])?;
        let request = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row_index.saturating_sub(1),
                        "endRowIndex": row_index,
                        "startColumnIndex": col_index.saturating_sub(1),
                        "endColumnIndex": col_index,
                    },
                    "cell": { "userEnteredFormat": { "wrapStrategy": "WRAP" } },
                    "fields": "userEnteredFormat.wrapStrategy",
                }
            }]
        });
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await?;
        let _: JsonValue = self.decode(resp).await?;
        Ok(())
    }
}

fn cell_text(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// First row number of an A1 range such as `'行事曆總表'!A5:K5`.
pub fn parse_updated_row(range: &str) -> Option<usize> {
    let cells = range.rsplit_once('!').map(|(_, c)| c).unwrap_or(range);
    let first = cells.split(':').next()?;
    let digits = first.trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '$');
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::sync::Mutex;

    const SHEET: &str = "行事曆總表";

    #[derive(Clone, Default)]
    struct FakeSheets {
        rows: Arc<Mutex<Vec<Vec<String>>>>,
        batch_requests: Arc<Mutex<Vec<JsonValue>>>,
    }

    fn targets_sheet(range: &str) -> bool {
        range.starts_with(&format!("'{SHEET}'"))
    }

    async fn get_values(
        State(fake): State<FakeSheets>,
        Path((_id, range)): Path<(String, String)>,
    ) -> Response {
        if !targets_sheet(&range) {
            return (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": {"code": 400, "message": format!("Unable to parse range: {range}")}})),
            )
                .into_response();
        }
        let rows = fake.rows.lock().await.clone();
        Json(json!({ "range": range, "majorDimension": "ROWS", "values": rows })).into_response()
    }

    async fn append_values(
        State(fake): State<FakeSheets>,
        Path((_id, range)): Path<(String, String)>,
        Json(body): Json<JsonValue>,
    ) -> Response {
        assert!(range.ends_with(":append"));
        let cells: Vec<String> = serde_json::from_value(body["values"][0].clone()).unwrap();
        let mut rows = fake.rows.lock().await;
        rows.push(cells);
        let n = rows.len();
        Json(json!({ "updates": { "updatedRange": format!("'{SHEET}'!A{n}:K{n}") } })).into_response()
    }

    async fn put_values(
        State(fake): State<FakeSheets>,
        Path((_id, _range)): Path<(String, String)>,
        Json(body): Json<JsonValue>,
    ) -> Response {
        let cells: Vec<String> = serde_json::from_value(body["values"][0].clone()).unwrap();
        let mut rows = fake.rows.lock().await;
        if rows.is_empty() {
            rows.push(cells);
        } else {
            rows[0] = cells;
        }
        Json(json!({ "updatedRows": 1 })).into_response()
    }

    async fn properties() -> Json<JsonValue> {
        Json(json!({ "sheets": [{ "properties": { "sheetId": 42, "title": SHEET } }] }))
    }

    async fn batch_update(
        State(fake): State<FakeSheets>,
        Path(_op): Path<String>,
        Json(body): Json<JsonValue>,
    ) -> Json<JsonValue> {
        fake.batch_requests.lock().await.push(body);
        Json(json!({ "replies": [{}] }))
    }

    async fn spawn(fake: FakeSheets) -> String {
        let app = Router::new()
            .route("/v4/spreadsheets/{id}", get(properties).post(batch_update))
            .route(
                "/v4/spreadsheets/{id}/values/{range}",
                get(get_values).put(put_values).post(append_values),
            )
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v4")
    }

    fn store(base_url: String, sheet_name: &str) -> GoogleSheetsStore {
        GoogleSheetsStore::new(
            SheetsConfig {
                spreadsheet_id: "sheet-123".into(),
                sheet_name: sheet_name.into(),
                access_token: "token".into(),
                base_url,
            },
            &HttpClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn updated_row_is_read_from_a1_range() {
        assert_eq!(parse_updated_row("'行事曆總表'!A5:K5"), Some(5));
        assert_eq!(parse_updated_row("'a!b'!$A$12:$K$12"), Some(12));
        assert_eq!(parse_updated_row("Sheet1!A1"), Some(1));
        assert_eq!(parse_updated_row("Sheet1!A:K"), None);
    }

    #[tokio::test]
    async fn header_append_and_wrap_round_trip_through_api() {
        let fake = FakeSheets::default();
        let base = spawn(fake.clone()).await;
        let store = store(base, SHEET);

        assert!(store.header_row().await.unwrap().is_empty());
        store
            .set_header_row(vec!["開始時間".into(), "活動名稱".into()])
            .await
            .unwrap();
        let row_index = store
            .append_row(vec!["2026/07/01 19:00".into(), "讀書會".into()])
            .await
            .unwrap();
        assert_eq!(row_index, 2);
        assert_eq!(store.column_count().await.unwrap(), 2);
        assert_eq!(store.data_rows().await.unwrap().len(), 1);

        store.format_cell_wrap(row_index, 2).await.unwrap();
        let requests = fake.batch_requests.lock().await;
        let range = &requests[0]["requests"][0]["repeatCell"]["range"];
        assert_eq!(range["sheetId"], 42);
        assert_eq!(range["startRowIndex"], 1);
        assert_eq!(range["endColumnIndex"], 2);
    }

    #[tokio::test]
    async fn unknown_sheet_is_reported_as_not_found() {
        let base = spawn(FakeSheets::default()).await;
        let store = store(base, "不存在");
        match store.read_table().await {
            Err(StoreError::SheetNotFound(name)) => assert_eq!(name, "不存在"),
            other => panic!("expected SheetNotFound, got {other:?}"),
        }
        assert!(matches!(
            store.format_cell_wrap(2, 1).await,
            Err(StoreError::SheetNotFound(_))
        ));
    }
}
