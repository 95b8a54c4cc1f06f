//! Picks the synchronous or the reactive path for one advised dispatch.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::Exchange;

use super::advised::AfterTask;
use super::step::{run_guarded, Completion, DoneCallback, Step};

pub(crate) fn dispatch(step: &dyn Step, exchange: Exchange, after: AfterTask) -> Completion {
    if exchange.is_transacted() {
        transacted(step, exchange, after)
    } else {
        reactive(step, exchange, after)
    }
}

/// Runs the step's synchronous contract on the calling thread. Nothing is
/// enqueued on the scheduler.
fn transacted(step: &dyn Step, mut exchange: Exchange, after: AfterTask) -> Completion {
    run_guarded(step, &mut exchange);
    after.inline().done(exchange, Completion::Sync);
    Completion::Sync
}

fn reactive(step: &dyn Step, exchange: Exchange, after: AfterTask) -> Completion {
    let span = exchange
        .unit_of_work()
        .filter(|uow| uow.is_before_after_process())
        .map(|uow| uow.diagnostic_span(exchange.exchange_id()));

    let Some(span) = span else {
        return step.process_async(
            exchange,
            Box::new(move |ex, completion| after.done(ex, completion)),
        );
    };

    // A completion arriving while the step call is still on the stack is
    // parked and finished once the step's span has been exited.
    let handoff = Arc::new(Mutex::new(Handoff::Calling(after.bracketed(span.clone()))));
    let shared = Arc::clone(&handoff);
    let done: DoneCallback = Box::new(move |ex, completion| {
        let mut state = shared.lock();
        match std::mem::replace(&mut *state, Handoff::Finished) {
            Handoff::Calling(after) => *state = Handoff::Parked(after, ex, completion),
            Handoff::Returned(after) => {
                drop(state);
                after.done(ex, completion);
            }
            Handoff::Parked(..) | Handoff::Finished => {}
        }
    });

    let completion = {
        let _entered = span.enter();
        step.process_async(exchange, done)
    };

    let mut state = handoff.lock();
    match std::mem::replace(&mut *state, Handoff::Finished) {
        Handoff::Calling(after) => *state = Handoff::Returned(after),
        Handoff::Parked(after, ex, parked) => {
            drop(state);
            after.done(ex, parked);
        }
        Handoff::Returned(_) | Handoff::Finished => {}
    }
    completion
}

enum Handoff {
    Calling(AfterTask),
    Parked(AfterTask, Exchange, Completion),
    Returned(AfterTask),
    Finished,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use relay_core::UnitOfWork;

    use crate::advice::{Advice, AdviceChain, AdviceState};
    use crate::config::SchedulerConfig;
    use crate::dispatch::{AdvisedStep, Completion, DoneCallback, FnStep, Step};
    use crate::reactive::ReactiveExecutor;

    use super::*;

    /// Completes on a different thread, like a step waiting on I/O.
    struct Detached;

    impl Step for Detached {
        fn process(&self, _exchange: &mut Exchange) -> anyhow::Result<()> {
            Ok(())
        }

        fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
            std::thread::spawn(move || done(exchange, Completion::Async));
            Completion::Async
        }
    }

    #[test]
    fn transacted_path_uses_the_sync_contract() {
        let executor = ReactiveExecutor::new(&SchedulerConfig {
            statistics_enabled: true,
        });
        let advised = AdvisedStep::new(AdviceChain::default(), executor.clone())
            .with_step(Arc::new(Detached));
        let done = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&done);
        let mut ex = Exchange::builder("tx").build();
        ex.ensure_unit_of_work().begin_transacted_by("jdbc");

        let completion = advised.dispatch(ex, Box::new(move |ex, c| *slot.lock() = Some((ex, c))));

        assert_eq!(completion, Completion::Sync);
        let (ex, reported) = done.lock().take().unwrap();
        assert_eq!(reported, Completion::Sync);
        assert!(ex.is_transacted());
        assert_eq!(executor.statistics().scheduled_tasks, 0);
    }

    #[test]
    fn async_step_completes_on_its_own_thread() {
        let advised = AdvisedStep::new(AdviceChain::default(), ReactiveExecutor::default())
            .with_step(Arc::new(Detached));
        let (tx, rx) = std::sync::mpsc::channel();

        let completion = advised.dispatch(
            Exchange::builder("async").build(),
            Box::new(move |ex, c| {
                let _ = tx.send((ex.exchange_id().to_string(), c));
            }),
        );

        assert_eq!(completion, Completion::Async);
        let (id, reported) = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(id, "async");
        assert_eq!(reported, Completion::Async);
    }

    type SpanLog = Arc<Mutex<Vec<(&'static str, Option<&'static str>)>>>;

    fn current_span(log: &SpanLog, at: &'static str) {
        log.lock()
            .push((at, tracing::Span::current().metadata().map(|m| m.name())));
    }

    /// Notes the current span while unwinding.
    struct SpanAfter(SpanLog);

    impl Advice for SpanAfter {
        fn name(&self) -> &str {
            "span-after"
        }

        fn before(&self, _exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
            Ok(None)
        }

        fn after(&self, _exchange: &mut Exchange, _state: Option<AdviceState>) -> anyhow::Result<()> {
            current_span(&self.0, "after");
            Ok(())
        }
    }

    fn diagnostic_exchange(id: &str) -> Exchange {
        let mut ex = Exchange::builder(id).build();
        ex.attach_unit_of_work(UnitOfWork::new().with_diagnostic_context());
        ex
    }

    fn traced<R>(f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn diagnostic_span_brackets_step_and_afters_but_not_the_callback() {
        let seen = SpanLog::default();
        let in_step = Arc::clone(&seen);
        let step = FnStep::new("spanned", move |_: &mut Exchange| {
            current_span(&in_step, "step");
            Ok(())
        });
        let chain = AdviceChain::builder()
            .advice(SpanAfter(Arc::clone(&seen)))
            .build();
        let advised =
            AdvisedStep::new(chain, ReactiveExecutor::default()).with_step(Arc::new(step));
        let in_callback = Arc::clone(&seen);

        let completion = traced(|| {
            let completion = advised.dispatch(
                diagnostic_exchange("mdc"),
                Box::new(move |_, _| current_span(&in_callback, "callback")),
            );
            assert!(tracing::Span::current().is_none());
            completion
        });

        assert_eq!(completion, Completion::Sync);
        assert_eq!(
            *seen.lock(),
            vec![
                ("step", Some("exchange")),
                ("after", Some("exchange")),
                ("callback", None),
            ]
        );
    }

    #[test]
    fn plain_unit_of_work_gets_no_span() {
        let seen: Arc<Mutex<Vec<bool>>> = Arc::default();
        let spans = Arc::clone(&seen);
        let step = FnStep::new("plain", move |_: &mut Exchange| {
            spans.lock().push(tracing::Span::current().is_none());
            Ok(())
        });
        let advised = AdvisedStep::new(AdviceChain::default(), ReactiveExecutor::default())
            .with_step(Arc::new(step));
        let mut ex = Exchange::builder("plain").build();
        ex.attach_unit_of_work(UnitOfWork::new());

        advised.dispatch(ex, Box::new(|_, _| {}));

        assert_eq!(*seen.lock(), vec![true]);
    }
}
