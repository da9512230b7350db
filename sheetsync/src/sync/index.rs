use std::collections::HashMap;
use std::fmt;

use smartsheet_core::{Row, Sheet};

use super::key::{MatchKey, normalize};

/// Match key → row lookup for one sheet, rebuilt on every run and never
/// mutated after [`RowIndex::build`] returns.
#[derive(Debug)]
pub struct RowIndex<'a> {
    rows: HashMap<MatchKey, &'a Row>,
    indexed: usize,
    skipped: usize,
    collisions: usize,
}

impl<'a> RowIndex<'a> {
    /// Indexes `rows` by the value in `match_column_id`. Rows without a
    /// usable key are left out and counted as skipped. When two rows share a
    /// key the later one wins.
    pub fn build(rows: &'a [Row], match_column_id: i64) -> Self {
        let mut map: HashMap<MatchKey, &'a Row> = HashMap::with_capacity(rows.len());
        let mut skipped = 0;
        let mut collisions = 0;

        for row in rows {
            let Some(key) = normalize(row.value(match_column_id)) else {
                tracing::debug!(row_id = row.id, "row has no usable match key");
                skipped += 1;
                continue;
            };
            if let Some(previous) = map.insert(key.clone(), row) {
                collisions += 1;
                tracing::warn!(
                    "duplicate match key {key}: row {} overwrites row {}",
                    row.id,
                    previous.id
                );
            }
            tracing::trace!("mapped key {key} to row {}", row.id);
        }

        Self {
            indexed: rows.len() - skipped,
            rows: map,
            skipped,
            collisions,
        }
    }

    pub fn get(&self, key: &MatchKey) -> Option<&'a Row> {
        self.rows.get(key).copied()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that produced a key, collisions included.
    pub fn indexed(&self) -> usize {
        self.indexed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

/// How a sheet's match column is selected: by id, or by its exact title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchColumn {
    Id(i64),
    Title(String),
}

impl MatchColumn {
    /// Column id within `sheet`, if such a column exists. For titles the
    /// first column with that exact title wins.
    pub fn resolve(&self, sheet: &Sheet) -> Option<i64> {
        match self {
            MatchColumn::Id(id) => sheet.column(*id).map(|column| column.id),
            MatchColumn::Title(title) => sheet
                .columns
                .iter()
                .find(|column| column.title == *title)
                .map(|column| column.id),
        }
    }
}

impl fmt::Display for MatchColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchColumn::Id(id) => write!(f, "{id}"),
            MatchColumn::Title(title) => write!(f, "'{title}'"),
        }
    }
}
