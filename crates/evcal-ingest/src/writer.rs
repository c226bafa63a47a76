use evcal_core::{resolve_columns, CanonicalField, ColumnMapping, ExtractedEvent};
use evcal_storage::{StoreError, TableStore, TableWriteLocks};
use tracing::{info, warn};

const WRAPPED_FIELDS: [CanonicalField; 2] = [CanonicalField::Description, CanonicalField::RawText];

/// Appends `event` as a new row and returns its 1-based row index.
///
/// A table whose header row names none of the canonical columns first gets
/// the canonical names placed after its widest occupied column. Header
/// bootstrap and append run under the table's write lock.
pub async fn append_event(
    store: &dyn TableStore,
    locks: &TableWriteLocks,
    event: &ExtractedEvent,
) -> Result<usize, StoreError> {
    let table_id = store.table_id();
    let _guard = locks.lock(&table_id).await;

    let mut snapshot = store.read_table().await?;
    let mut mapping = resolve_columns(&snapshot.header_row());
    if mapping.is_empty() {
        let header = bootstrap_header(&snapshot.header_row(), snapshot.column_count());
        info!(table = %table_id, columns = header.len(), "writing canonical header row");
        store.set_header_row(header).await?;
        snapshot = store.read_table().await?;
        mapping = resolve_columns(&snapshot.header_row());
        if mapping.is_empty() {
            return Err(StoreError::Malformed(format!(
                "header row of {table_id} still has no known columns"
            )));
        }
    }

    let width = snapshot.column_count().max(mapping.max_index());
    let row_index = store.append_row(build_row(&mapping, width, event)).await?;

    for field in WRAPPED_FIELDS {
        let Some(col) = mapping.get(field) else {
            continue;
        };
        if event.cell_value(field).is_empty() {
            continue;
        }
        if let Err(err) = store.format_cell_wrap(row_index, col).await {
            warn!(row_index, col, error = %err, "could not enable wrap on cell");
        }
    }
    Ok(row_index)
}

/// Row of `width` cells with each mapped field at its column; every other
/// cell is empty.
pub fn build_row(mapping: &ColumnMapping, width: usize, event: &ExtractedEvent) -> Vec<String> {
    let mut cells = vec![String::new(); width.max(mapping.max_index())];
    for (field, col) in mapping.iter() {
        cells[col - 1] = event.cell_value(field);
    }
    cells
}

/// Existing header padded to `width`, then the canonical names. Columns that
/// already hold data never receive a canonical name.
fn bootstrap_header(existing: &[String], width: usize) -> Vec<String> {
    let mut header = existing.to_vec();
    header.resize(width.max(existing.len()), String::new());
    header.extend(CanonicalField::canonical_headers());
    header
}
