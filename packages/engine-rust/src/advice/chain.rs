use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_core::error::panic_message;
use relay_core::{AdvicePhase, Exchange, ExchangeFailure};
use smallvec::SmallVec;
use tracing::debug;

/// Opaque value an advice hands from its `before` to its `after`.
pub struct AdviceState(Box<dyn Any + Send>);

impl AdviceState {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Recovers the typed value, or gives the state back if the type is wrong.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when the state does not hold a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(original) => Err(Self(original)),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for AdviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdviceState(..)")
    }
}

/// Paired before/after hooks wrapped around a step.
///
/// `after` receives whatever `before` returned, provided the advice reports
/// [`Advice::has_state`]. Stateless advices always get `None`.
pub trait Advice: Send + Sync {
    fn name(&self) -> &str;

    fn has_state(&self) -> bool {
        false
    }

    /// # Errors
    ///
    /// An error aborts the dispatch before the step runs.
    fn before(&self, exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>>;

    /// # Errors
    ///
    /// An error is recorded as the exchange failure; remaining afters still run.
    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()>;
}

/// States captured by one run of the befores, one slot per stateful advice.
pub type AdviceStates = SmallVec<[Option<AdviceState>; 4]>;

/// An advice plus whether it owns a state slot, asked once at build time.
struct Registered {
    advice: Arc<dyn Advice>,
    stateful: bool,
}

/// Immutable, ordered list of advices. Cheap to clone.
#[derive(Clone)]
pub struct AdviceChain {
    advices: Arc<[Registered]>,
    stateful: usize,
}

impl Default for AdviceChain {
    fn default() -> Self {
        AdviceChainBuilder::default().build()
    }
}

impl AdviceChain {
    #[must_use]
    pub fn builder() -> AdviceChainBuilder {
        AdviceChainBuilder::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.advices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.advices.is_empty()
    }

    /// Number of state slots a dispatch through this chain needs.
    #[must_use]
    pub fn stateful_count(&self) -> usize {
        self.stateful
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Advice>> {
        self.advices.iter().map(|entry| &entry.advice)
    }

    /// Runs every `before` in registration order.
    ///
    /// On the first failure the exchange carries an
    /// [`ExchangeFailure::Advice`] and `None` is returned; no `after` of any
    /// advice runs in that case.
    pub fn run_befores(&self, exchange: &mut Exchange) -> Option<AdviceStates> {
        let mut states = AdviceStates::with_capacity(self.stateful);
        for Registered { advice, stateful } in self.advices.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| advice.before(exchange)))
                .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
            match outcome {
                Ok(state) => {
                    if *stateful {
                        states.push(state);
                    }
                }
                Err(source) => {
                    debug!(
                        exchange_id = %exchange.exchange_id(),
                        advice = advice.name(),
                        error = %source,
                        "before advice failed"
                    );
                    exchange.set_failure(ExchangeFailure::Advice {
                        advice: advice.name().to_string(),
                        phase: AdvicePhase::Before,
                        source,
                    });
                    return None;
                }
            }
        }
        Some(states)
    }

    /// Runs every `after` in reverse order, consuming states from the end.
    ///
    /// Each after is isolated: a failure or panic is recorded on the exchange
    /// (the last one wins) and the remaining afters still run.
    pub fn run_afters(&self, exchange: &mut Exchange, mut states: AdviceStates) {
        for Registered { advice, stateful } in self.advices.iter().rev() {
            let state = if *stateful {
                states.pop().flatten()
            } else {
                None
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| advice.after(exchange, state)))
                .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
            if let Err(source) = outcome {
                debug!(
                    exchange_id = %exchange.exchange_id(),
                    advice = advice.name(),
                    error = %source,
                    "after advice failed"
                );
                exchange.set_failure(ExchangeFailure::Advice {
                    advice: advice.name().to_string(),
                    phase: AdvicePhase::After,
                    source,
                });
            }
        }
    }
}

fn panicked(payload: &(dyn Any + Send)) -> anyhow::Error {
    anyhow::anyhow!("panicked: {}", panic_message(payload))
}

impl fmt::Debug for AdviceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.advices.iter().map(|entry| entry.advice.name()))
            .finish()
    }
}

#[derive(Default)]
pub struct AdviceChainBuilder {
    advices: Vec<Arc<dyn Advice>>,
}

impl AdviceChainBuilder {
    #[must_use]
    pub fn advice(mut self, advice: impl Advice + 'static) -> Self {
        self.advices.push(Arc::new(advice));
        self
    }

    #[must_use]
    pub fn shared(mut self, advice: Arc<dyn Advice>) -> Self {
        self.advices.push(advice);
        self
    }

    #[must_use]
    pub fn build(self) -> AdviceChain {
        let advices: Vec<Registered> = self
            .advices
            .into_iter()
            .map(|advice| Registered {
                stateful: advice.has_state(),
                advice,
            })
            .collect();
        let stateful = advices.iter().filter(|entry| entry.stateful).count();
        AdviceChain {
            advices: advices.into(),
            stateful,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    pub(crate) type Log = Arc<Mutex<Vec<String>>>;

    /// Records its calls and optionally fails or hands over a state.
    pub(crate) struct Recording {
        pub(crate) name: &'static str,
        pub(crate) log: Log,
        pub(crate) stateful: bool,
        pub(crate) fail_before: bool,
        pub(crate) fail_after: bool,
        pub(crate) panic_after: bool,
    }

    impl Recording {
        pub(crate) fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                stateful: false,
                fail_before: false,
                fail_after: false,
                panic_after: false,
            }
        }

        pub(crate) fn stateful(mut self) -> Self {
            self.stateful = true;
            self
        }
    }

    impl Advice for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn has_state(&self) -> bool {
            self.stateful
        }

        fn before(&self, _exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
            self.log.lock().push(format!("before:{}", self.name));
            if self.fail_before {
                anyhow::bail!("{} refused", self.name);
            }
            Ok(self.stateful.then(|| AdviceState::new(self.name)))
        }

        fn after(&self, _exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
            let state = state.and_then(|s| s.downcast::<&'static str>().ok());
            self.log
                .lock()
                .push(format!("after:{}:{}", self.name, state.unwrap_or("-")));
            if self.panic_after {
                panic!("{} exploded", self.name);
            }
            if self.fail_after {
                anyhow::bail!("{} failed", self.name);
            }
            Ok(())
        }
    }

    fn exchange() -> Exchange {
        Exchange::builder("ex-1").build()
    }

    #[test]
    fn afters_unwind_in_reverse_with_their_own_state() {
        let log = Log::default();
        let chain = AdviceChain::builder()
            .advice(Recording::new("a", &log).stateful())
            .advice(Recording::new("b", &log))
            .advice(Recording::new("c", &log).stateful())
            .build();
        let mut ex = exchange();

        let states = chain.run_befores(&mut ex).unwrap();
        assert_eq!(states.len(), 2);
        chain.run_afters(&mut ex, states);

        assert_eq!(
            *log.lock(),
            vec![
                "before:a", "before:b", "before:c", "after:c:c", "after:b:-", "after:a:a"
            ]
        );
        assert!(!ex.is_failed());
    }

    #[test]
    fn stateless_advices_take_no_slots() {
        let log = Log::default();
        let chain = AdviceChain::builder()
            .advice(Recording::new("a", &log))
            .advice(Recording::new("b", &log))
            .build();

        assert_eq!(chain.stateful_count(), 0);
        let states = chain.run_befores(&mut exchange()).unwrap();
        assert!(states.is_empty());
    }

    #[test]
    fn failing_before_stops_the_chain() {
        let log = Log::default();
        let mut refusing = Recording::new("b", &log);
        refusing.fail_before = true;
        let chain = AdviceChain::builder()
            .advice(Recording::new("a", &log).stateful())
            .advice(refusing)
            .advice(Recording::new("c", &log))
            .build();
        let mut ex = exchange();

        assert!(chain.run_befores(&mut ex).is_none());
        assert_eq!(*log.lock(), vec!["before:a", "before:b"]);
        match ex.failure().map(|f| &**f) {
            Some(ExchangeFailure::Advice { advice, phase, .. }) => {
                assert_eq!(advice, "b");
                assert_eq!(*phase, AdvicePhase::Before);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn after_faults_are_isolated_and_last_wins() {
        let log = Log::default();
        let mut first = Recording::new("first", &log);
        first.fail_after = true;
        let mut second = Recording::new("second", &log);
        second.panic_after = true;
        let chain = AdviceChain::builder()
            .advice(first)
            .advice(second)
            .advice(Recording::new("third", &log))
            .build();
        let mut ex = exchange();

        let states = chain.run_befores(&mut ex).unwrap();
        chain.run_afters(&mut ex, states);

        let afters: Vec<_> = log
            .lock()
            .iter()
            .filter(|entry| entry.starts_with("after"))
            .cloned()
            .collect();
        assert_eq!(afters, vec!["after:third:-", "after:second:-", "after:first:-"]);
        match ex.failure().map(|f| &**f) {
            Some(ExchangeFailure::Advice { advice, phase, .. }) => {
                assert_eq!(advice, "first");
                assert_eq!(*phase, AdvicePhase::After);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn state_slots_are_fixed_when_the_chain_is_built() {
        use std::sync::atomic::{AtomicBool, Ordering};

        /// Reports a state slot only on the first question.
        struct Fickle {
            asked: AtomicBool,
            log: Log,
        }

        impl Advice for Fickle {
            fn name(&self) -> &str {
                "fickle"
            }

            fn has_state(&self) -> bool {
                !self.asked.swap(true, Ordering::SeqCst)
            }

            fn before(&self, _exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
                Ok(Some(AdviceState::new("fickle")))
            }

            fn after(&self, _exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
                let state = state.and_then(|s| s.downcast::<&'static str>().ok());
                self.log
                    .lock()
                    .push(format!("after:fickle:{}", state.unwrap_or("-")));
                Ok(())
            }
        }

        let log = Log::default();
        let chain = AdviceChain::builder()
            .advice(Fickle {
                asked: AtomicBool::new(false),
                log: Arc::clone(&log),
            })
            .advice(Recording::new("b", &log).stateful())
            .build();
        let mut ex = exchange();

        for _ in 0..2 {
            let states = chain.run_befores(&mut ex).unwrap();
            assert_eq!(states.len(), 2);
            chain.run_afters(&mut ex, states);
        }

        let afters: Vec<_> = log
            .lock()
            .iter()
            .filter(|entry| entry.starts_with("after"))
            .cloned()
            .collect();
        assert_eq!(
            afters,
            vec!["after:b:b", "after:fickle:fickle", "after:b:b", "after:fickle:fickle"]
        );
    }

    #[test]
    fn state_downcast_returns_wrong_types() {
        let state = AdviceState::new(7_u32);
        let state = state.downcast::<String>().unwrap_err();
        assert_eq!(state.downcast_ref::<u32>(), Some(&7));
    }
}
