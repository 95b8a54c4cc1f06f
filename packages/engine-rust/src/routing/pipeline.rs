use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use relay_core::Exchange;
use tracing::trace;

use crate::dispatch::{run_guarded, Completion, DoneCallback, Step};
use crate::reactive::{ReactiveExecutor, Task};

const PENDING: u8 = 0;
const FINISHED_INLINE: u8 = 1;
const RETURNED: u8 = 2;

/// Steps applied one after another.
///
/// Each continuation is scheduled on the reactive executor, so the stack stays
/// flat however many steps the pipeline has and however each step completes.
/// The pipeline stops early once the exchange is failed or route-stopped.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    steps: Arc<[Arc<dyn Step>]>,
    executor: ReactiveExecutor,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        steps: Vec<Arc<dyn Step>>,
        executor: ReactiveExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            steps: steps.into(),
            executor,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn should_stop(exchange: &Exchange) -> bool {
    exchange.is_failed() || exchange.is_route_stop()
}

/// One walk through the steps for one exchange.
struct Run {
    steps: Arc<[Arc<dyn Step>]>,
    executor: ReactiveExecutor,
    done: DoneCallback,
    phase: Arc<AtomicU8>,
}

impl Run {
    fn advance(self, index: usize, exchange: Exchange) {
        if index >= self.steps.len() || should_stop(&exchange) {
            self.finish(exchange);
            return;
        }
        let step = Arc::clone(&self.steps[index]);
        trace!(exchange_id = %exchange.exchange_id(), step = step.name(), index, "pipeline step");
        let executor = self.executor.clone();
        step.process_async(
            exchange,
            Box::new(move |exchange, _| {
                executor.schedule(Task::new("pipeline-next", move |_| {
                    self.advance(index + 1, exchange);
                }));
            }),
        );
    }

    fn finish(self, exchange: Exchange) {
        let completion = match self.phase.compare_exchange(
            PENDING,
            FINISHED_INLINE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Completion::Sync,
            Err(_) => Completion::Async,
        };
        (self.done)(exchange, completion);
    }
}

impl Step for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        for step in self.steps.iter() {
            if should_stop(exchange) {
                break;
            }
            run_guarded(step.as_ref(), exchange);
        }
        Ok(())
    }

    fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
        let phase = Arc::new(AtomicU8::new(PENDING));
        let run = Run {
            steps: Arc::clone(&self.steps),
            executor: self.executor.clone(),
            done,
            phase: Arc::clone(&phase),
        };
        self.executor
            .schedule(Task::new("pipeline-start", move |_| run.advance(0, exchange)));
        match phase.compare_exchange(PENDING, RETURNED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Completion::Async,
            Err(_) => Completion::Sync,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}
