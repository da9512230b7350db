use std::collections::{HashMap, HashSet};
use std::io;

use smartsheet_core::{Sheet, SmartsheetError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::service::{AttachmentTransport, SheetSource};
use crate::sync::backoff::Backoff;
use crate::sync::executor::TransferExecutor;
use crate::sync::index::{MatchColumn, RowIndex};
use crate::sync::key::{MatchKey, classify};
use crate::sync::planner;
use crate::sync::report::{RunEvent, RunReporter, RunStatistics, SheetSide, SyncOutcome};

/// Failures that end a run before any attachment is touched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot access sheet {sheet_id}: {source}")]
    SheetAccess {
        sheet_id: i64,
        #[source]
        source: SmartsheetError,
    },
    #[error("match column {column} not found in sheet {sheet_id}")]
    MatchColumnMissing { sheet_id: i64, column: MatchColumn },
    #[error("temp download folder unavailable: {0}")]
    TempStorage(#[source] io::Error),
    #[error("interrupted while loading sheet {sheet_id}")]
    Interrupted { sheet_id: i64 },
}

/// One attachment sync run: load both sheets, index, plan, copy, report.
pub struct SyncRunner<S> {
    service: S,
    config: SyncConfig,
    backoff: Backoff,
}

impl<S> SyncRunner<S>
where
    S: SheetSource + AttachmentTransport,
{
    pub fn new(service: S, config: SyncConfig) -> Self {
        Self {
            service,
            config,
            backoff: Backoff::for_sheet_fetch(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<RunStatistics, SyncError> {
        let config = &self.config;
        tokio::fs::create_dir_all(&config.temp_dir)
            .await
            .map_err(SyncError::TempStorage)?;

        let mut source = self.load_sheet(config.source_sheet_id, cancel).await?;
        let mut target = self.load_sheet(config.target_sheet_id, cancel).await?;
        let source_column = resolve_match_column(&source, &config.source_match_column)?;
        let target_column = resolve_match_column(&target, &config.target_match_column)?;

        let mut reporter = RunReporter::new(dry_run);
        self.fill_missing_attachments(
            &mut source,
            source_column,
            &mut target,
            target_column,
            &mut reporter,
        )
        .await;

        let source_index = RowIndex::build(&source.rows, source_column);
        record_index(&mut reporter, SheetSide::Source, &source_index);
        let target_index = RowIndex::build(&target.rows, target_column);
        record_index(&mut reporter, SheetSide::Target, &target_index);
        tracing::info!(
            "indexed {} source row(s) and {} target row(s)",
            source_index.indexed(),
            target_index.indexed()
        );

        let plan = planner::plan(&source.rows, source_column, &target_index);
        reporter.record_plan(&plan);
        tracing::info!("{} attachment(s) to copy", plan.task_count());

        if dry_run {
            for task in plan.tasks() {
                tracing::info!(
                    "[dry run] would copy '{}' from source row {} to target row {}",
                    task.attachment.name,
                    task.source_row_id,
                    task.target_row_id
                );
            }
        } else {
            let executor = TransferExecutor::new(
                &self.service,
                &config.temp_dir,
                config.source_sheet_id,
                config.target_sheet_id,
            );
            executor
                .execute_all(plan.into_tasks(), config.concurrency, cancel, &mut reporter)
                .await;
        }

        if reporter.skipped_any_task() {
            reporter.record(&RunEvent::Interrupted);
        }
        let stats = reporter.summarize();
        stats.log_summary();
        Ok(stats)
    }

    /// Lists attachments through the row endpoint for matched rows whose
    /// sheet payload carried no `attachments` key.
    ///
    /// A failed listing counts as one error. When a target row cannot be
    /// listed its existing names are unknown, so every source row paired with
    /// it is emptied and nothing is copied there.
    async fn fill_missing_attachments(
        &self,
        source: &mut Sheet,
        source_column: i64,
        target: &mut Sheet,
        target_column: i64,
        reporter: &mut RunReporter,
    ) {
        let target_positions: HashMap<MatchKey, usize> = target
            .rows
            .iter()
            .enumerate()
            .filter_map(|(pos, row)| classify(row.value(target_column)).ok().map(|key| (key, pos)))
            .collect();
        let pairs: Vec<(usize, usize)> = source
            .rows
            .iter()
            .enumerate()
            .filter_map(|(pos, row)| {
                let key = classify(row.value(source_column)).ok()?;
                target_positions.get(&key).map(|target_pos| (pos, *target_pos))
            })
            .collect();

        let mut unreadable = HashSet::new();
        for &(_, target_pos) in &pairs {
            let row = &mut target.rows[target_pos];
            if row.attachments.is_some() || unreadable.contains(&target_pos) {
                continue;
            }
            tracing::debug!("listing attachments of target row {}", row.id);
            match self.service.fetch_row_attachments(target.id, row.id).await {
                Ok(attachments) => row.attachments = Some(attachments),
                Err(err) => {
                    tracing::error!(
                        "cannot list attachments of target row {}: {err}; nothing will be copied to it",
                        row.id
                    );
                    reporter.record(&RunEvent::Outcome(SyncOutcome::Failed(err.to_string())));
                    unreadable.insert(target_pos);
                }
            }
        }

        for &(source_pos, target_pos) in &pairs {
            let row = &mut source.rows[source_pos];
            if unreadable.contains(&target_pos) {
                row.attachments = Some(Vec::new());
                continue;
            }
            if row.attachments.is_some() {
                continue;
            }
            tracing::debug!("listing attachments of source row {}", row.id);
            match self.service.fetch_row_attachments(source.id, row.id).await {
                Ok(attachments) => row.attachments = Some(attachments),
                Err(err) => {
                    tracing::error!("cannot list attachments of source row {}: {err}", row.id);
                    reporter.record(&RunEvent::Outcome(SyncOutcome::Failed(err.to_string())));
                    row.attachments = Some(Vec::new());
                }
            }
        }
    }

    /// Fetches a sheet, retrying rate limited and transient failures.
    async fn load_sheet(
        &self,
        sheet_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Sheet, SyncError> {
        let attempts = self.config.sheet_fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            tracing::info!("loading sheet {sheet_id}");
            let err = match self.service.fetch_sheet(sheet_id).await {
                Ok(sheet) => {
                    tracing::info!(
                        "sheet {sheet_id} '{}': {} row(s), {} column(s)",
                        sheet.name,
                        sheet.rows.len(),
                        sheet.columns.len()
                    );
                    return Ok(sheet);
                }
                Err(err) => err,
            };
            attempt += 1;
            if !err.is_retryable() || attempt >= attempts {
                return Err(SyncError::SheetAccess {
                    sheet_id,
                    source: err,
                });
            }
            let delay = self.backoff.delay(attempt - 1, err.retry_after());
            tracing::warn!(
                "loading sheet {sheet_id} failed ({err}), retry {attempt}/{} in {delay:?}",
                attempts - 1
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SyncError::Interrupted { sheet_id }),
            }
        }
    }
}

fn resolve_match_column(sheet: &Sheet, column: &MatchColumn) -> Result<i64, SyncError> {
    let id = column.resolve(sheet).ok_or_else(|| SyncError::MatchColumnMissing {
        sheet_id: sheet.id,
        column: column.clone(),
    })?;
    tracing::debug!("sheet {}: match column {column} has id {id}", sheet.id);
    Ok(id)
}

fn record_index(reporter: &mut RunReporter, side: SheetSide, index: &RowIndex<'_>) {
    reporter.record(&RunEvent::IndexBuilt {
        side,
        indexed: index.indexed(),
        skipped: index.skipped(),
        collisions: index.collisions(),
    });
}
