//! Reconcile metrics tracking
//!
//! Thread-safe counters shared by every concurrent reconcile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::gate::GateDecision;
use crate::reconciler::{ReconcileError, ReconcileOutcome};

/// Thread-safe metrics for reconcile cycles
#[derive(Debug, Clone, Default)]
pub struct ReconcileMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    cycles: AtomicU64,
    skipped_deleted: AtomicU64,
    skipped_paused: AtomicU64,
    skipped_not_eligible: AtomicU64,
    absent: AtomicU64,
    kept: AtomicU64,
    deleted: AtomicU64,
    dry_run_deletions: AtomicU64,
    precondition_failures: AtomicU64,
    transient_failures: AtomicU64,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one reconcile cycle
    pub fn record(&self, result: &Result<ReconcileOutcome, ReconcileError>) {
        let inner = &self.inner;
        inner.cycles.fetch_add(1, Ordering::Relaxed);

        let counter = match result {
            Ok(ReconcileOutcome::Skipped(GateDecision::SkipDeleted)) => &inner.skipped_deleted,
            Ok(ReconcileOutcome::Skipped(GateDecision::SkipPaused)) => &inner.skipped_paused,
            Ok(ReconcileOutcome::Skipped(GateDecision::SkipNotEligible)) => {
                &inner.skipped_not_eligible
            }
            // a gate never reports Proceed as a skip
            Ok(ReconcileOutcome::Skipped(GateDecision::Proceed)) => return,
            Ok(ReconcileOutcome::Absent) => &inner.absent,
            Ok(ReconcileOutcome::Kept) => &inner.kept,
            Ok(ReconcileOutcome::Deleted) => &inner.deleted,
            Ok(ReconcileOutcome::DryRun) => &inner.dry_run_deletions,
            Err(e) if e.is_transient() => &inner.transient_failures,
            Err(_) => &inner.precondition_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.inner.deleted.load(Ordering::Relaxed)
    }

    pub fn transient_failures(&self) -> u64 {
        self.inner.transient_failures.load(Ordering::Relaxed)
    }

    pub fn precondition_failures(&self) -> u64 {
        self.inner.precondition_failures.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;

        MetricsSummary {
            cycles: load(&inner.cycles),
            skipped_deleted: load(&inner.skipped_deleted),
            skipped_paused: load(&inner.skipped_paused),
            skipped_not_eligible: load(&inner.skipped_not_eligible),
            absent: load(&inner.absent),
            kept: load(&inner.kept),
            deleted: load(&inner.deleted),
            dry_run_deletions: load(&inner.dry_run_deletions),
            precondition_failures: load(&inner.precondition_failures),
            transient_failures: load(&inner.transient_failures),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub cycles: u64,
    pub skipped_deleted: u64,
    pub skipped_paused: u64,
    pub skipped_not_eligible: u64,
    pub absent: u64,
    pub kept: u64,
    pub deleted: u64,
    pub dry_run_deletions: u64,
    pub precondition_failures: u64,
    pub transient_failures: u64,
}

impl MetricsSummary {
    pub fn skipped(&self) -> u64 {
        self.skipped_deleted + self.skipped_paused + self.skipped_not_eligible
    }

    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Watchdog Metrics Summary ===");
        log::info!(
            "Cycles: {} total, {} skipped ({} deleting, {} paused, {} not eligible)",
            self.cycles,
            self.skipped(),
            self.skipped_deleted,
            self.skipped_paused,
            self.skipped_not_eligible
        );
        log::info!(
            "Stacks: {} absent, {} kept, {} deleted, {} dry-run deletions",
            self.absent,
            self.kept,
            self.deleted,
            self.dry_run_deletions
        );
        log::info!(
            "Failures: {} precondition, {} transient",
            self.precondition_failures,
            self.transient_failures
        );
    }
}
