use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters for one executor. Passed in explicitly; the executor
/// keeps no process-wide state.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    trashed: AtomicU64,
    quarantined: AtomicU64,
    hard_deleted: AtomicU64,
    undeletes: AtomicU64,
    quarantine_collisions: AtomicU64,
    optimistic_rechecks: AtomicU64,
    temp_move_attempts: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trashed(&self) -> u64 {
        self.trashed.load(Ordering::Relaxed)
    }

    pub fn quarantined(&self) -> u64 {
        self.quarantined.load(Ordering::Relaxed)
    }

    pub fn hard_deleted(&self) -> u64 {
        self.hard_deleted.load(Ordering::Relaxed)
    }

    /// Quarantined files brought back to life by a matching upload.
    pub fn undeletes(&self) -> u64 {
        self.undeletes.load(Ordering::Relaxed)
    }

    pub fn quarantine_collisions(&self) -> u64 {
        self.quarantine_collisions.load(Ordering::Relaxed)
    }

    pub fn optimistic_rechecks(&self) -> u64 {
        self.optimistic_rechecks.load(Ordering::Relaxed)
    }

    pub fn temp_move_attempts(&self) -> u64 {
        self.temp_move_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn record_trashed(&self, count: u64) {
        self.trashed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_quarantined(&self, count: u64) {
        self.quarantined.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_hard_deleted(&self, count: u64) {
        self.hard_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_undelete(&self) {
        self.undeletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_quarantine_collision(&self) {
        self.quarantine_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_optimistic_recheck(&self) {
        self.optimistic_rechecks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_temp_move_attempt(&self) {
        self.temp_move_attempts.fetch_add(1, Ordering::Relaxed);
    }
}
