use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_core::{Exchange, ExchangeFailure};

/// How a step finished relative to the call that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The completion callback already ran before the call returned.
    Sync,
    /// The callback fires later, possibly on another thread.
    Async,
}

impl Completion {
    #[must_use]
    pub fn is_sync(self) -> bool {
        matches!(self, Self::Sync)
    }
}

/// Invoked exactly once with the exchange when a step finishes.
pub type DoneCallback = Box<dyn FnOnce(Exchange, Completion) + Send + 'static>;

/// One unit of processing applied to an exchange.
///
/// Every step has a synchronous contract used on the transacted path. The
/// asynchronous contract defaults to running the synchronous one inline and
/// completing with [`Completion::Sync`]; steps that genuinely suspend override
/// it and invoke `done` later.
///
/// Failures are reported on the exchange. An `Err` from [`Step::process`] or a
/// panic inside it is recorded as the exchange failure by [`run_guarded`].
/// A custom `process_async` owns the exchange and must record its own
/// failures; a panic escaping it cannot be recovered.
pub trait Step: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Processes the exchange on the calling thread.
    ///
    /// # Errors
    ///
    /// Any error is attached to the exchange as [`ExchangeFailure::Step`].
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()>;

    /// Processes the exchange and invokes `done` when finished.
    fn process_async(&self, mut exchange: Exchange, done: DoneCallback) -> Completion {
        run_guarded(self, &mut exchange);
        done(exchange, Completion::Sync);
        Completion::Sync
    }
}

impl<S: Step + ?Sized> Step for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        (**self).process(exchange)
    }

    fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
        (**self).process_async(exchange, done)
    }
}

/// Runs the synchronous contract, attaching any error or panic to the exchange.
pub fn run_guarded<S: Step + ?Sized>(step: &S, exchange: &mut Exchange) {
    match catch_unwind(AssertUnwindSafe(|| step.process(exchange))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => exchange.set_failure(err),
        Err(payload) => {
            exchange.set_failure(ExchangeFailure::from_panic(step.name(), payload.as_ref()));
        }
    }
}

/// Closure-backed step.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&mut Exchange) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Step for FnStep<F>
where
    F: Fn(&mut Exchange) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        (self.f)(exchange)
    }
}

impl<F> std::fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish_non_exhaustive()
    }
}
