use std::sync::atomic::{AtomicU64, Ordering};

/// Advisory scheduler counters shared by every worker of one executor.
///
/// Counting is skipped entirely when disabled. Counters are relaxed atomics:
/// exact real-time accuracy is not required.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    enabled: bool,
    next_worker_number: AtomicU64,
    created_workers: AtomicU64,
    running_workers: AtomicU64,
    pending_tasks: AtomicU64,
    scheduled_tasks: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatistics {
    pub created_workers: u64,
    pub running_workers: u64,
    pub pending_tasks: u64,
    pub scheduled_tasks: u64,
}

impl SchedulerStats {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Numbers workers for log output. Always counts, even when disabled.
    pub(crate) fn next_worker_number(&self) -> u64 {
        self.next_worker_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn worker_created(&self) {
        if self.enabled {
            self.created_workers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn drain_started(&self) {
        if self.enabled {
            self.running_workers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn drain_finished(&self) {
        if self.enabled {
            self.running_workers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn task_enqueued(&self) {
        if self.enabled {
            self.scheduled_tasks.fetch_add(1, Ordering::Relaxed);
            self.pending_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn task_dequeued(&self) {
        if self.enabled {
            self.pending_tasks.fetch_sub(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerStatistics {
        SchedulerStatistics {
            created_workers: self.created_workers.load(Ordering::Relaxed),
            running_workers: self.running_workers.load(Ordering::Relaxed),
            pending_tasks: self.pending_tasks.load(Ordering::Relaxed),
            scheduled_tasks: self.scheduled_tasks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stats_stay_zero() {
        let stats = SchedulerStats::new(false);
        stats.worker_created();
        stats.task_enqueued();
        stats.drain_started();

        assert_eq!(stats.snapshot(), SchedulerStatistics::default());
    }

    #[test]
    fn enabled_stats_track_pending() {
        let stats = SchedulerStats::new(true);
        stats.task_enqueued();
        stats.task_enqueued();
        stats.task_dequeued();

        let snap = stats.snapshot();
        assert_eq!(snap.pending_tasks, 1);
        assert_eq!(snap.scheduled_tasks, 2);
    }

    #[test]
    fn worker_numbers_count_even_when_disabled() {
        let stats = SchedulerStats::new(false);
        assert_eq!(stats.next_worker_number(), 1);
        assert_eq!(stats.next_worker_number(), 2);
    }
}
