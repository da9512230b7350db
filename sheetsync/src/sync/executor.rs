use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use futures_util::{StreamExt, stream};
use smartsheet_core::SmartsheetError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::planner::TransferTask;
use super::report::{RunEvent, RunReporter, SyncOutcome};
use crate::service::AttachmentTransport;

const FALLBACK_FILE_NAME: &str = "attachment";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("api error: {0}")]
    Api(#[from] SmartsheetError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("attachment {attachment_id} has no download url")]
    MissingUrl { attachment_id: i64 },
}

/// Copies planned attachments one task at a time. Every task gets its own
/// scratch directory under `temp_root`, removed once the task finishes.
pub struct TransferExecutor<'a, T> {
    transport: &'a T,
    temp_root: PathBuf,
    source_sheet_id: i64,
    target_sheet_id: i64,
}

impl<'a, T: AttachmentTransport> TransferExecutor<'a, T> {
    pub fn new(
        transport: &'a T,
        temp_root: impl Into<PathBuf>,
        source_sheet_id: i64,
        target_sheet_id: i64,
    ) -> Self {
        Self {
            transport,
            temp_root: temp_root.into(),
            source_sheet_id,
            target_sheet_id,
        }
    }

    /// Runs a single task. Failures are logged and returned as
    /// [`SyncOutcome::Failed`]; they never propagate.
    pub async fn execute(&self, task: &TransferTask) -> SyncOutcome {
        let name = &task.attachment.name;
        tracing::info!(
            "uploading '{name}' to target row {} (key {})",
            task.target_row_id,
            task.key
        );
        match self.try_execute(task).await {
            Ok(()) => {
                tracing::info!("copied '{name}' to target row {}", task.target_row_id);
                SyncOutcome::Copied
            }
            Err(err) => {
                tracing::error!(
                    source_sheet = self.source_sheet_id,
                    source_row = task.source_row_id,
                    target_sheet = self.target_sheet_id,
                    target_row = task.target_row_id,
                    attachment_id = task.attachment.id,
                    "error copying attachment '{name}': {err}"
                );
                SyncOutcome::Failed(err.to_string())
            }
        }
    }

    async fn try_execute(&self, task: &TransferTask) -> Result<(), TransferError> {
        let scratch = tempfile::Builder::new()
            .prefix("task-")
            .tempdir_in(&self.temp_root)?;
        let local = scratch.path().join(safe_file_name(&task.attachment.name));

        let result = self.transfer(task, &local).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            tracing::warn!(
                "could not delete temp dir {}: {err}",
                scratch_path.display()
            );
        }
        result
    }

    async fn transfer(&self, task: &TransferTask, local: &Path) -> Result<(), TransferError> {
        self.transport
            .download_attachment(self.source_sheet_id, &task.attachment, local)
            .await?;
        self.transport
            .upload_attachment(
                self.target_sheet_id,
                task.target_row_id,
                &task.attachment,
                local,
            )
            .await
    }

    /// Executes `tasks` and records every outcome in `reporter`.
    ///
    /// With `concurrency == 1` tasks run strictly in plan order. Above that,
    /// tasks are grouped by target row; groups run concurrently, tasks within a
    /// group run one after another. After `cancel` fires no new task starts and
    /// the remaining ones are recorded as not attempted.
    pub async fn execute_all(
        &self,
        tasks: Vec<TransferTask>,
        concurrency: usize,
        cancel: &CancellationToken,
        reporter: &mut RunReporter,
    ) {
        let groups = if concurrency <= 1 {
            tasks.into_iter().map(|task| vec![task]).collect()
        } else {
            group_by_target_row(tasks)
        };

        let mut pending = stream::iter(groups)
            .map(|group| self.execute_group(group, cancel))
            .buffer_unordered(concurrency.max(1));
        while let Some(events) = pending.next().await {
            for event in &events {
                reporter.record(event);
            }
        }
    }

    async fn execute_group(
        &self,
        group: Vec<TransferTask>,
        cancel: &CancellationToken,
    ) -> Vec<RunEvent> {
        let mut events = Vec::with_capacity(group.len());
        for task in &group {
            if cancel.is_cancelled() {
                tracing::debug!(
                    "not starting '{}' for target row {}: run cancelled",
                    task.attachment.name,
                    task.target_row_id
                );
                events.push(RunEvent::NotAttempted);
                continue;
            }
            events.push(RunEvent::Outcome(self.execute(task).await));
        }
        events
    }
}

/// Groups tasks by target row, keeping first-seen row order and task order
/// inside each group.
fn group_by_target_row(tasks: Vec<TransferTask>) -> Vec<Vec<TransferTask>> {
    let mut groups: Vec<Vec<TransferTask>> = Vec::new();
    let mut slots: HashMap<i64, usize> = HashMap::new();
    for task in tasks {
        let slot = *slots.entry(task.target_row_id).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(task);
    }
    groups
}

/// Final path component of `name`, so a crafted attachment name cannot
/// escape the scratch directory.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}
