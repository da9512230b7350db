use serde::Serialize;

use super::planner::{RowPlan, SyncPlan, UnmatchedReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Copied,
    SkippedDuplicate,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetSide {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    IndexBuilt {
        side: SheetSide,
        indexed: usize,
        skipped: usize,
        collisions: usize,
    },
    RowUnmatched(UnmatchedReason),
    RowMatched {
        empty: bool,
    },
    TaskPlanned,
    Outcome(SyncOutcome),
    /// Task dropped because the run was cancelled before it started.
    NotAttempted,
    Interrupted,
}

/// Final counters of one run. The first six fields are the stable summary
/// contract; the rest are diagnostic detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub rows_processed: u64,
    pub rows_matched: u64,
    pub rows_unmatched: u64,
    pub attachments_copied: u64,
    pub attachments_skipped: u64,
    pub errors: u64,

    pub rows_without_key: u64,
    pub rows_empty: u64,
    pub source_rows_indexed: u64,
    pub source_rows_skipped: u64,
    pub target_rows_indexed: u64,
    pub target_rows_skipped: u64,
    pub key_collisions: u64,
    pub tasks_planned: u64,
    pub tasks_not_attempted: u64,
    pub interrupted: bool,
    pub dry_run: bool,
}

impl RunStatistics {
    pub fn log_summary(&self) {
        tracing::info!("── Summary ──");
        tracing::info!("  total rows processed: {}", self.rows_processed);
        tracing::info!("  rows with matches: {}", self.rows_matched);
        tracing::info!(
            "  rows without matches: {} ({} without a match key)",
            self.rows_unmatched,
            self.rows_without_key
        );
        if self.dry_run {
            tracing::info!("  attachments that would be copied: {}", self.tasks_planned);
        } else {
            tracing::info!("  attachments synced: {}", self.attachments_copied);
        }
        tracing::info!(
            "  attachments skipped (duplicates): {}",
            self.attachments_skipped
        );
        tracing::info!("  errors: {}", self.errors);
        tracing::info!(
            "  source rows indexed/skipped: {}/{}, target rows indexed/skipped: {}/{}",
            self.source_rows_indexed,
            self.source_rows_skipped,
            self.target_rows_indexed,
            self.target_rows_skipped
        );
        if self.interrupted {
            tracing::warn!(
                "  interrupted: {} planned transfer(s) not attempted",
                self.tasks_not_attempted
            );
        }
    }
}

/// Additive aggregation of run events. Nothing reads intermediate totals.
#[derive(Debug, Default)]
pub struct RunReporter {
    stats: RunStatistics,
}

impl RunReporter {
    pub fn new(dry_run: bool) -> Self {
        Self {
            stats: RunStatistics {
                dry_run,
                ..RunStatistics::default()
            },
        }
    }

    pub fn record(&mut self, event: &RunEvent) {
        let stats = &mut self.stats;
        match event {
            RunEvent::IndexBuilt {
                side,
                indexed,
                skipped,
                collisions,
            } => {
                let (indexed_total, skipped_total) = match side {
                    SheetSide::Source => (
                        &mut stats.source_rows_indexed,
                        &mut stats.source_rows_skipped,
                    ),
                    SheetSide::Target => (
                        &mut stats.target_rows_indexed,
                        &mut stats.target_rows_skipped,
                    ),
                };
                *indexed_total += *indexed as u64;
                *skipped_total += *skipped as u64;
                stats.key_collisions += *collisions as u64;
            }
            RunEvent::RowUnmatched(reason) => {
                stats.rows_processed += 1;
                stats.rows_unmatched += 1;
                if matches!(reason, UnmatchedReason::NoKey(_)) {
                    stats.rows_without_key += 1;
                }
            }
            RunEvent::RowMatched { empty } => {
                stats.rows_processed += 1;
                stats.rows_matched += 1;
                if *empty {
                    stats.rows_empty += 1;
                }
            }
            RunEvent::TaskPlanned => stats.tasks_planned += 1,
            RunEvent::Outcome(SyncOutcome::Copied) => stats.attachments_copied += 1,
            RunEvent::Outcome(SyncOutcome::SkippedDuplicate) => stats.attachments_skipped += 1,
            RunEvent::Outcome(SyncOutcome::Failed(_)) => stats.errors += 1,
            RunEvent::NotAttempted => stats.tasks_not_attempted += 1,
            RunEvent::Interrupted => stats.interrupted = true,
        }
    }

    /// Records the row-level and duplicate accounting of a plan.
    pub fn record_plan(&mut self, plan: &SyncPlan) {
        for row in &plan.rows {
            match row {
                RowPlan::Unmatched(unmatched) => {
                    self.record(&RunEvent::RowUnmatched(unmatched.reason.clone()));
                }
                RowPlan::Matched(matched) => {
                    self.record(&RunEvent::RowMatched {
                        empty: matched.is_empty(),
                    });
                    for _ in &matched.duplicates {
                        self.record(&RunEvent::Outcome(SyncOutcome::SkippedDuplicate));
                    }
                    for _ in &matched.tasks {
                        self.record(&RunEvent::TaskPlanned);
                    }
                }
            }
        }
    }

    /// True once any planned task was dropped by cancellation.
    pub fn skipped_any_task(&self) -> bool {
        self.stats.tasks_not_attempted > 0
    }

    pub fn summarize(&self) -> RunStatistics {
        self.stats.clone()
    }
}
