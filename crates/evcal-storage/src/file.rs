//! Single-table store persisted as a JSON document on local disk.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{StoreError, TableSnapshot, TableStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableDocument {
    #[serde(default)]
    rows: Vec<Vec<String>>,
    /// 1-based (row, column) cells with wrapping enabled.
    #[serde(default)]
    wrapped: BTreeSet<(usize, usize)>,
}

/// A missing file reads as an empty table; the file is created on first write.
#[derive(Debug)]
pub struct JsonFileTable {
    path: PathBuf,
    mutation: Mutex<()>,
}

impl JsonFileTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mutation: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn wrapped_cells(&self) -> Result<Vec<(usize, usize)>, StoreError> {
        Ok(self.load().await?.wrapped.into_iter().collect())
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    async fn load(&self) -> Result<TableDocument, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(TableDocument::default()),
            Err(err) => Err(self.io_error(&self.path, err)),
        }
    }

    /// Publishes the document with a temp-file write followed by a rename so
    /// readers never observe a partial file.
    async fn persist(&self, doc: &TableDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| self.io_error(&parent, err))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|err| self.io_error(&temp_path, err))?;
        file.write_all(&bytes)
            .await
            .map_err(|err| self.io_error(&temp_path, err))?;
        file.flush()
            .await
            .map_err(|err| self.io_error(&temp_path, err))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_error(&self.path, err));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for JsonFileTable {
    fn table_id(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn read_table(&self) -> Result<TableSnapshot, StoreError> {
        Ok(TableSnapshot::new(self.load().await?.rows))
    }

    async fn append_row(&self, cells: Vec<String>) -> Result<usize, StoreError> {
        let _guard = self.mutation.lock().await;
        let mut doc = self.load().await?;
        doc.rows.push(cells);
        self.persist(&doc).await?;
        Ok(doc.rows.len())
    }

    async fn set_header_row(&self, names: Vec<String>) -> Result<(), StoreError> {
        let _guard = self.mutation.lock().await;
        let mut doc = self.load().await?;
        match doc.rows.first_mut() {
            Some(header) => *header = names,
            None => doc.rows.push(names),
        }
        self.persist(&doc).await
    }

    async fn format_cell_wrap(&self, row_index: usize, col_index: usize) -> Result<(), StoreError> {
        let _guard = self.mutation.lock().await;
        let mut doc = self.load().await?;
        doc.wrapped.insert((row_index, col_index));
        self.persist(&doc).await
    }
}
