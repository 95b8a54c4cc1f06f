use std::borrow::Cow;
use std::fmt;

use super::worker::Worker;

type TaskFn = Box<dyn FnOnce(&Worker) + Send + 'static>;

/// A scheduled continuation.
///
/// The closure receives the worker running it, so follow-up work can be
/// scheduled on the same worker without a thread-local lookup. The label shows
/// up in logs when the task panics.
pub struct Task {
    label: Cow<'static, str>,
    run: TaskFn,
}

impl Task {
    pub fn new(
        label: impl Into<Cow<'static, str>>,
        run: impl FnOnce(&Worker) + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, TaskFn) {
        (self.label, self.run)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish_non_exhaustive()
    }
}
