use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{StoreError, TableSnapshot, TableStore};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<Vec<String>>,
    wrapped: BTreeSet<(usize, usize)>,
}

/// In-process table. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTable {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rows(name, Vec::new())
    }

    pub fn with_rows(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                rows,
                wrapped: BTreeSet::new(),
            }),
        }
    }

    /// Every stored row, header row included, without padding.
    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.state.lock().await.rows.clone()
    }

    pub async fn wrapped_cells(&self) -> Vec<(usize, usize)> {
        self.state.lock().await.wrapped.iter().copied().collect()
    }
}

#[async_trait]
impl TableStore for MemoryTable {
    fn table_id(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn read_table(&self) -> Result<TableSnapshot, StoreError> {
        Ok(TableSnapshot::new(self.rows().await))
    }

    async fn append_row(&self, cells: Vec<String>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.rows.push(cells);
        Ok(state.rows.len())
    }

    async fn set_header_row(&self, names: Vec<String>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.rows.first_mut() {
            Some(header) => *header = names,
            None => state.rows.push(names),
        }
        Ok(())
    }

    async fn format_cell_wrap(&self, row_index: usize, col_index: usize) -> Result<(), StoreError> {
        self.state.lock().await.wrapped.insert((row_index, col_index));
        Ok(())
    }
}
