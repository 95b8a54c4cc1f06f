//! Per-thread cooperative task queue.
//!
//! A [`Worker`] turns recursive continuation chains into an iterative drain
//! loop: a task that schedules more work while a drain is active only enqueues
//! it, and the outer loop picks it up once the task returns. Stack depth stays
//! constant no matter how long the chain is.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use relay_core::error::panic_message;
use tracing::warn;

use super::stats::SchedulerStats;
use super::task::Task;

/// Where a task lands in the current queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Head,
    Tail,
}

/// Cooperative task queue owned by exactly one thread.
///
/// `Worker` is `!Send`, so the re-entrant drain of [`Worker::schedule_sync`]
/// can only ever happen on the owning thread.
pub struct Worker {
    number: u64,
    queue: RefCell<VecDeque<Task>>,
    back: RefCell<Vec<VecDeque<Task>>>,
    running: Cell<bool>,
    stats: Arc<SchedulerStats>,
    _not_send: PhantomData<Rc<()>>,
}

impl Worker {
    /// Creates an isolated worker reporting into `stats`.
    #[must_use]
    pub fn new(stats: Arc<SchedulerStats>) -> Self {
        stats.worker_created();
        Self {
            number: stats.next_worker_number(),
            queue: RefCell::new(VecDeque::new()),
            back: RefCell::new(Vec::new()),
            running: Cell::new(false),
            stats,
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Whether a drain loop is active on this worker.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Tasks waiting in the current queue and in suspended queues.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len() + self.back.borrow().iter().map(VecDeque::len).sum::<usize>()
    }

    /// Enqueues at the tail; drains if no drain is in progress.
    pub fn schedule(&self, task: Task) {
        self.submit(task, Placement::Tail, false, false);
    }

    /// Enqueues at the head; drains if no drain is in progress.
    pub fn schedule_first(&self, task: Task) {
        self.submit(task, Placement::Head, false, false);
    }

    /// Starts a new top-level flow.
    ///
    /// A non-empty current queue is suspended on the back-stack and resumed
    /// only after the new flow has fully drained.
    pub fn schedule_main(&self, task: Task) {
        self.submit(task, Placement::Head, true, false);
    }

    /// Enqueues at the head and drains immediately, even inside an active drain.
    ///
    /// The previous running state is restored afterwards, so the outer drain
    /// keeps ownership of the loop.
    pub fn schedule_sync(&self, task: Task) {
        self.submit(task, Placement::Head, false, true);
    }

    /// Enqueues at the tail without draining.
    pub fn schedule_queue(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
        self.stats.task_enqueued();
    }

    /// Runs exactly one task from the current queue.
    ///
    /// Returns `false` if the queue was empty.
    pub fn execute_from_queue(&self) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(task) => {
                self.stats.task_dequeued();
                self.run_task(task);
                true
            }
            None => false,
        }
    }

    fn submit(&self, task: Task, placement: Placement, main: bool, sync: bool) {
        if main {
            self.suspend_current_queue();
        }
        {
            let mut queue = self.queue.borrow_mut();
            match placement {
                Placement::Head => queue.push_front(task),
                Placement::Tail => queue.push_back(task),
            }
        }
        self.stats.task_enqueued();

        if sync || !self.running.get() {
            let was_running = self.running.replace(true);
            if !was_running {
                self.stats.drain_started();
            }
            self.drain();
            self.running.set(was_running);
            if !was_running {
                self.stats.drain_finished();
            }
        }
    }

    fn suspend_current_queue(&self) {
        let mut queue = self.queue.borrow_mut();
        if !queue.is_empty() {
            let suspended = std::mem::take(&mut *queue);
            self.back.borrow_mut().push(suspended);
        }
    }

    fn drain(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            if let Some(task) = next {
                self.stats.task_dequeued();
                self.run_task(task);
                continue;
            }
            let resumed = self.back.borrow_mut().pop();
            match resumed {
                Some(queue) => *self.queue.borrow_mut() = queue,
                None => break,
            }
        }
    }

    fn run_task(&self, task: Task) {
        let (label, run) = task.into_parts();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| run(self))) {
            warn!(
                worker = self.number,
                task = %label,
                panic = %panic_message(payload.as_ref()),
                "scheduled task panicked"
            );
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("number", &self.number)
            .field("running", &self.running.get())
            .field("pending", &self.pending())
            .finish()
    }
}
