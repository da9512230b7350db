use std::collections::{HashMap, HashSet};

use smartsheet_core::{Attachment, Row};

use super::duplicate::{existing_names, is_duplicate};
use super::index::RowIndex;
use super::key::{KeyRejection, MatchKey, classify};

/// One pending copy of `attachment` from a source row to a target row.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub source_row_id: i64,
    pub target_row_id: i64,
    pub key: MatchKey,
    pub attachment: Attachment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnmatchedReason {
    NoKey(KeyRejection),
    NoTargetRow,
}

#[derive(Debug, Clone)]
pub struct UnmatchedRow {
    pub source_row_id: i64,
    pub key: Option<MatchKey>,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone)]
pub struct MatchedRow {
    pub source_row_id: i64,
    pub target_row_id: i64,
    pub key: MatchKey,
    pub tasks: Vec<TransferTask>,
    /// Source attachment names that already exist on the target row.
    pub duplicates: Vec<String>,
}

impl MatchedRow {
    /// Nothing left to copy after filtering.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum RowPlan {
    Unmatched(UnmatchedRow),
    Matched(MatchedRow),
}

/// Per-row plan in source-row order.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub rows: Vec<RowPlan>,
}

impl SyncPlan {
    pub fn tasks(&self) -> impl Iterator<Item = &TransferTask> {
        self.rows.iter().flat_map(|row| match row {
            RowPlan::Matched(matched) => matched.tasks.as_slice(),
            RowPlan::Unmatched(_) => &[][..],
        })
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    /// Tasks in source-row order, then attachment order within a row.
    pub fn into_tasks(self) -> Vec<TransferTask> {
        self.rows
            .into_iter()
            .flat_map(|row| match row {
                RowPlan::Matched(matched) => matched.tasks,
                RowPlan::Unmatched(_) => Vec::new(),
            })
            .collect()
    }
}

/// Pairs every source row with its target row and decides which FILE
/// attachments to copy.
///
/// A `(target row, name)` pair is planned at most once per run: names that
/// already exist on the target row, or that an earlier source row (or an
/// earlier attachment on the same row) already claimed, are reported as
/// duplicates.
pub fn plan(source_rows: &[Row], source_match_column_id: i64, target: &RowIndex<'_>) -> SyncPlan {
    let mut claimed: HashMap<i64, HashSet<String>> = HashMap::new();
    let mut rows = Vec::with_capacity(source_rows.len());

    for source in source_rows {
        let key = match classify(source.value(source_match_column_id)) {
            Ok(key) => key,
            Err(rejection) => {
                tracing::info!(
                    "source row {} skipped: no match key ({rejection})",
                    source.id
                );
                rows.push(RowPlan::Unmatched(UnmatchedRow {
                    source_row_id: source.id,
                    key: None,
                    reason: UnmatchedReason::NoKey(rejection),
                }));
                continue;
            }
        };

        let Some(target_row) = target.get(&key) else {
            tracing::info!(
                "no matching target row for key {key} (source row {}), skipping",
                source.id
            );
            rows.push(RowPlan::Unmatched(UnmatchedRow {
                source_row_id: source.id,
                key: Some(key),
                reason: UnmatchedReason::NoTargetRow,
            }));
            continue;
        };

        let names = claimed.entry(target_row.id).or_insert_with(|| {
            existing_names(target_row)
                .into_iter()
                .map(str::to_owned)
                .collect()
        });

        let mut tasks = Vec::new();
        let mut duplicates = Vec::new();
        for attachment in source.file_attachments() {
            if is_duplicate(&attachment.name, &*names) {
                tracing::info!(
                    "skipping duplicate '{}' for key {key} (target row {})",
                    attachment.name,
                    target_row.id
                );
                duplicates.push(attachment.name.clone());
                continue;
            }
            names.insert(attachment.name.clone());
            tasks.push(TransferTask {
                source_row_id: source.id,
                target_row_id: target_row.id,
                key: key.clone(),
                attachment: attachment.clone(),
            });
        }

        if tasks.is_empty() {
            tracing::debug!(
                "nothing to copy for key {key}: source row {} → target row {}",
                source.id,
                target_row.id
            );
        }

        rows.push(RowPlan::Matched(MatchedRow {
            source_row_id: source.id,
            target_row_id: target_row.id,
            key,
            tasks,
            duplicates,
        }));
    }

    SyncPlan { rows }
}
