use evcal_core::{resolve_columns, CanonicalField};
use evcal_storage::{StoreError, TableStore};
use tracing::debug;

/// True when some data row already holds `raw_text` in its raw-text column,
/// compared after [`trim_message`] on both sides. A table without that column
/// never reports a duplicate.
pub async fn is_duplicate(store: &dyn TableStore, raw_text: &str) -> Result<bool, StoreError> {
    let snapshot = store.read_table().await?;
    let mapping = resolve_columns(&snapshot.header_row());
    let Some(col) = mapping.get(CanonicalField::RawText) else {
        debug!(table = %store.table_id(), "no raw text column; skipping duplicate check");
        return Ok(false);
    };

    let needle = trim_message(raw_text);
    Ok(snapshot
        .data_rows()
        .iter()
        .any(|row| row.get(col - 1).is_some_and(|cell| trim_message(cell) == needle)))
}

/// Strips surrounding whitespace and U+FEFF, which `str::trim` keeps.
pub fn trim_message(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}
