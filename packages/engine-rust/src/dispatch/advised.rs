use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_core::{Exchange, ExchangeFailure};
use tracing::{debug, trace, Span};

use super::policy;
use super::step::{run_guarded, Completion, DoneCallback, Step};
use crate::advice::{AdviceChain, AdviceStates};
use crate::reactive::{ReactiveExecutor, Task};
use crate::shutdown::ShutdownController;

/// Runs once the step has finished, before any after advice.
pub type AfterProcessHook = Arc<dyn Fn(&mut Exchange) + Send + Sync>;

const REJECTED_REASON: &str = "engine is force stopping";

/// A step wrapped in an advice chain.
///
/// Dispatch never returns an error: every outcome, including rejection,
/// travels on the exchange handed to the callback.
#[derive(Clone)]
pub struct AdvisedStep {
    name: String,
    step: Option<Arc<dyn Step>>,
    chain: AdviceChain,
    executor: ReactiveExecutor,
    shutdown: Option<Arc<ShutdownController>>,
    after_process: Option<AfterProcessHook>,
}

impl AdvisedStep {
    #[must_use]
    pub fn new(chain: AdviceChain, executor: ReactiveExecutor) -> Self {
        Self {
            name: "advised".to_string(),
            step: None,
            chain,
            executor,
            shutdown: None,
            after_process: None,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.step = Some(step);
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[must_use]
    pub fn with_after_process(mut self, hook: AfterProcessHook) -> Self {
        self.after_process = Some(hook);
        self
    }

    #[must_use]
    pub fn chain(&self) -> &AdviceChain {
        &self.chain
    }

    #[must_use]
    pub fn executor(&self) -> &ReactiveExecutor {
        &self.executor
    }

    /// Routes one exchange through the advices and the step.
    ///
    /// `callback` fires exactly once. [`Completion::Sync`] means the step
    /// finished without suspending. The callback itself may still be queued
    /// behind the task currently running on this thread's worker.
    pub fn dispatch(&self, mut exchange: Exchange, callback: DoneCallback) -> Completion {
        let Some(step) = self.step.as_ref() else {
            callback(exchange, Completion::Sync);
            return Completion::Sync;
        };
        if exchange.is_route_stop() {
            trace!(exchange_id = %exchange.exchange_id(), "route stopped, skipping step");
            callback(exchange, Completion::Sync);
            return Completion::Sync;
        }
        if self.is_rejecting() {
            debug!(exchange_id = %exchange.exchange_id(), step = %self.name, "dispatch rejected");
            exchange.set_failure(ExchangeFailure::Rejected {
                reason: REJECTED_REASON.to_string(),
            });
            callback(exchange, Completion::Sync);
            return Completion::Sync;
        }

        let Some(states) = self.chain.run_befores(&mut exchange) else {
            callback(exchange, Completion::Sync);
            return Completion::Sync;
        };

        let after = AfterTask {
            unwind: Unwind {
                chain: self.chain.clone(),
                states,
                hook: self.after_process.clone(),
            },
            executor: self.executor.clone(),
            callback,
            inline: false,
            bracket: None,
        };
        policy::dispatch(step.as_ref(), exchange, after)
    }

    fn is_rejecting(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|shutdown| shutdown.is_force_shutdown())
    }
}

impl Step for AdvisedStep {
    fn name(&self) -> &str {
        &self.name
    }

    /// Same advice contract as [`AdvisedStep::dispatch`], entirely inline.
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let Some(step) = self.step.as_ref() else {
            return Ok(());
        };
        if exchange.is_route_stop() {
            return Ok(());
        }
        if self.is_rejecting() {
            exchange.set_failure(ExchangeFailure::Rejected {
                reason: REJECTED_REASON.to_string(),
            });
            return Ok(());
        }
        let Some(states) = self.chain.run_befores(exchange) else {
            return Ok(());
        };
        run_guarded(step.as_ref(), exchange);
        Unwind {
            chain: self.chain.clone(),
            states,
            hook: self.after_process.clone(),
        }
        .run(exchange);
        Ok(())
    }

    fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
        self.dispatch(exchange, done)
    }
}

impl fmt::Debug for AdvisedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedStep")
            .field("name", &self.name)
            .field("step", &self.step.as_ref().map(|step| step.name().to_string()))
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// After-process hook plus after advices for one dispatch.
struct Unwind {
    chain: AdviceChain,
    states: AdviceStates,
    hook: Option<AfterProcessHook>,
}

impl Unwind {
    fn run(self, exchange: &mut Exchange) {
        if let Some(hook) = self.hook {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (*hook)(exchange))) {
                exchange.set_failure(ExchangeFailure::from_panic("after-process", payload.as_ref()));
            }
        }
        self.chain.run_afters(exchange, self.states);
    }
}

/// Completion continuation created by [`AdvisedStep::dispatch`].
pub(crate) struct AfterTask {
    unwind: Unwind,
    executor: ReactiveExecutor,
    callback: DoneCallback,
    inline: bool,
    bracket: Option<Span>,
}

impl AfterTask {
    /// Hands the exchange to the callback on the calling thread instead of
    /// the worker. Fixed at dispatch time, whatever the step or the after
    /// advices do to the transaction markers.
    pub(crate) fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    /// Runs the unwind inside `span`. The callback stays outside it.
    pub(crate) fn bracketed(mut self, span: Span) -> Self {
        self.bracket = Some(span);
        self
    }

    /// Unwinds the advices, then hands the exchange to the original callback.
    pub(crate) fn done(self, mut exchange: Exchange, completion: Completion) {
        {
            let _bracket = self.bracket.as_ref().map(Span::enter);
            self.unwind.run(&mut exchange);
        }
        let callback = self.callback;
        if self.inline {
            callback(exchange, completion);
        } else {
            self.executor.schedule(Task::new("advice-callback", move |_| {
                callback(exchange, completion);
            }));
        }
    }
}
