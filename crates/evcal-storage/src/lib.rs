//! Tabular store adapters + HTTP client utilities for evcal.
//!
//! A table is a grid of string cells whose first row holds header names. The
//! adapters never cache table state between calls; every read goes back to the
//! backing store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

mod file;
mod memory;
mod sheets;

pub use file::JsonFileTable;
pub use memory::MemoryTable;
pub use sheets::{parse_updated_row, GoogleSheetsStore, SheetsConfig};

pub const CRATE_NAME: &str = "evcal-storage";

/// Ordered cell values of one data row, padded to the table's column count.
pub type StoredRow = Vec<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected store response: {0}")]
    Malformed(String),
}

/// Point-in-time copy of every row in a table, header row included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    rows: Vec<Vec<String>>,
}

impl TableSnapshot {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Width of the widest occupied row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Total rows including the header row.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn header_row(&self) -> Vec<String> {
        self.rows.first().cloned().unwrap_or_default()
    }

    pub fn data_rows(&self) -> Vec<StoredRow> {
        let width = self.column_count();
        self.rows
            .iter()
            .skip(1)
            .map(|row| {
                let mut cells = row.clone();
                cells.resize(width, String::new());
                cells
            })
            .collect()
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Identity of the backing table, used to serialize writers.
    fn table_id(&self) -> String;

    async fn read_table(&self) -> Result<TableSnapshot, StoreError>;

    async fn header_row(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_table().await?.header_row())
    }

    async fn data_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self.read_table().await?.data_rows())
    }

    async fn column_count(&self) -> Result<usize, StoreError> {
        Ok(self.read_table().await?.column_count())
    }

    /// Appends one row after the last occupied row and returns its 1-based index.
    async fn append_row(&self, cells: Vec<String>) -> Result<usize, StoreError>;

    /// Replaces row 1 with `names`.
    async fn set_header_row(&self, names: Vec<String>) -> Result<(), StoreError>;

    /// Turns on text wrapping for a single cell. Both indices are 1-based.
    async fn format_cell_wrap(&self, row_index: usize, col_index: usize)
        -> Result<(), StoreError>;
}

/// Per-table mutexes that serialize the read-header/bootstrap/append sequence
/// of concurrent writers within this process.
#[derive(Debug, Clone, Default)]
pub struct TableWriteLocks {
    tables: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TableWriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, table_id: &str) -> OwnedMutexGuard<()> {
        let table = {
            let mut map = self.tables.lock().await;
            map.entry(table_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        table.lock_owned().await
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(self.timeout);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn snapshot_pads_data_rows_to_widest_row() {
        let snapshot = TableSnapshot::new(vec![
            row(&["開始時間", "活動名稱"]),
            row(&["2026/07/01", "讀書會", "", "備註"]),
            row(&["2026/07/02"]),
        ]);
        assert_eq!(snapshot.column_count(), 4);
        assert_eq!(snapshot.header_row(), row(&["開始時間", "活動名稱"]));
        let data = snapshot.data_rows();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1], row(&["2026/07/02", "", "", ""]));
    }

    #[test]
    fn empty_snapshot_has_no_header_or_columns() {
        let snapshot = TableSnapshot::default();
        assert!(snapshot.header_row().is_empty());
        assert!(snapshot.data_rows().is_empty());
        assert_eq!(snapshot.column_count(), 0);
    }

    #[tokio::test]
    async fn write_locks_are_shared_per_table() {
        let locks = TableWriteLocks::new();
        let guard = locks.lock("sheets:a").await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("sheets:b")).await;
        assert!(other.is_ok(), "different tables must not contend");

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock("sheets:a")).await;
        assert!(same.is_err(), "same table must wait for the holder");

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock("sheets:a")).await;
        assert!(same.is_ok());
    }
}
