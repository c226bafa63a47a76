use std::collections::BTreeMap;

use crate::CanonicalField;

/// Canonical field -> 1-based column index, resolved from a live header row.
/// Never cached: callers resolve again on every check or write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    indices: BTreeMap<CanonicalField, usize>,
}

impl ColumnMapping {
    pub fn get(&self, field: CanonicalField) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Largest resolved column index, 0 when nothing resolved.
    pub fn max_index(&self) -> usize {
        self.indices.values().copied().max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, usize)> + '_ {
        self.indices.iter().map(|(f, i)| (*f, *i))
    }
}

/// Exact string match of each canonical header against `header_row`; the first
/// occurrence wins. No trimming, no partial matches.
pub fn resolve_columns(header_row: &[String]) -> ColumnMapping {
    let indices = CanonicalField::ALL
        .iter()
        .filter_map(|field| {
            header_row
                .iter()
                .position(|cell| cell == field.header())
                .map(|pos| (*field, pos + 1))
        })
        .collect();
    ColumnMapping { indices }
}
