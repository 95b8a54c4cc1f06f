use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use tracing::debug;

use super::stats::{SchedulerStatistics, SchedulerStats};
use super::task::Task;
use super::worker::Worker;
use crate::config::SchedulerConfig;

struct ExecutorShared {
    stats: Arc<SchedulerStats>,
}

thread_local! {
    // One worker per (thread, executor). Entries whose executor is gone are
    // pruned on the next lookup.
    static WORKERS: RefCell<Vec<(Weak<ExecutorShared>, Rc<Worker>)>> = const { RefCell::new(Vec::new()) };
}

/// Handle to a family of per-thread workers.
///
/// Cloning is cheap and every clone resolves to the same worker on a given
/// thread. Two independently created executors never share workers, so tests
/// can run side by side without interfering.
#[derive(Clone)]
pub struct ReactiveExecutor {
    shared: Arc<ExecutorShared>,
}

impl ReactiveExecutor {
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(ExecutorShared {
                stats: Arc::new(SchedulerStats::new(config.statistics_enabled)),
            }),
        }
    }

    /// Runs `f` with the calling thread's worker, creating it on first use.
    pub fn with_worker<R>(&self, f: impl FnOnce(&Worker) -> R) -> R {
        let worker = self.current_worker();
        f(&worker)
    }

    pub fn schedule(&self, task: Task) {
        self.current_worker().schedule(task);
    }

    pub fn schedule_first(&self, task: Task) {
        self.current_worker().schedule_first(task);
    }

    pub fn schedule_main(&self, task: Task) {
        self.current_worker().schedule_main(task);
    }

    pub fn schedule_sync(&self, task: Task) {
        self.current_worker().schedule_sync(task);
    }

    pub fn schedule_queue(&self, task: Task) {
        self.current_worker().schedule_queue(task);
    }

    pub fn execute_from_queue(&self) -> bool {
        self.current_worker().execute_from_queue()
    }

    #[must_use]
    pub fn statistics(&self) -> SchedulerStatistics {
        self.shared.stats.snapshot()
    }

    #[must_use]
    pub fn is_statistics_enabled(&self) -> bool {
        self.shared.stats.is_enabled()
    }

    /// The RefCell borrow is released before the worker is used, so tasks can
    /// resolve the worker again while a drain is running.
    fn current_worker(&self) -> Rc<Worker> {
        let existing = WORKERS.with(|workers| {
            let mut workers = workers.borrow_mut();
            workers.retain(|(owner, _)| owner.strong_count() > 0);
            workers
                .iter()
                .find(|(owner, _)| std::ptr::eq(owner.as_ptr(), Arc::as_ptr(&self.shared)))
                .map(|(_, worker)| Rc::clone(worker))
        });
        if let Some(worker) = existing {
            return worker;
        }

        let worker = Rc::new(Worker::new(Arc::clone(&self.shared.stats)));
        debug!(worker = worker.number(), "created reactive worker");
        WORKERS.with(|workers| {
            workers
                .borrow_mut()
                .push((Arc::downgrade(&self.shared), Rc::clone(&worker)));
        });
        worker
    }
}

impl Default for ReactiveExecutor {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl fmt::Debug for ReactiveExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveExecutor")
            .field("statistics", &self.statistics())
            .finish()
    }
}
