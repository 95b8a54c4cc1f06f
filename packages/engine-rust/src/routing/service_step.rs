use std::fmt;

use relay_core::{Exchange, ExchangeFailure};
use thiserror::Error;
use tokio::runtime::Handle;
use tower::{Service, ServiceExt};
use tracing::{trace, warn};

use crate::dispatch::{await_completion, Completion, DoneCallback, Step};
use crate::reactive::ReactiveExecutor;

/// Error returned by services driven through a [`ServiceStep`].
///
/// Carries the exchange back so its failure can be recorded on it.
#[derive(Debug, Error)]
#[error("service call failed: {source}")]
pub struct ServiceError {
    pub exchange: Exchange,
    #[source]
    pub source: anyhow::Error,
}

impl ServiceError {
    pub fn new(exchange: Exchange, source: impl Into<anyhow::Error>) -> Self {
        Self {
            exchange,
            source: source.into(),
        }
    }
}

/// Adapts an asynchronous `tower` service into a step.
///
/// Each exchange is handed to a clone of the service on the given runtime.
/// The step completes asynchronously on whichever runtime thread resolves
/// the call. A panicking service loses the exchange; the step then completes
/// with a failed exchange under the same id. If the runtime is gone the
/// callback is dropped uncalled.
#[derive(Clone)]
pub struct ServiceStep<S> {
    name: String,
    service: S,
    runtime: Handle,
    executor: ReactiveExecutor,
}

impl<S> ServiceStep<S> {
    pub fn new(
        name: impl Into<String>,
        service: S,
        runtime: Handle,
        executor: ReactiveExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            runtime,
            executor,
        }
    }
}

impl<S> Step for ServiceStep<S>
where
    S: Service<Exchange, Response = Exchange, Error = ServiceError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    /// Blocks the calling thread until the service answers. Must not be called
    /// from inside the runtime the service runs on.
    ///
    /// Fails when the call never completes, e.g. because the runtime has shut
    /// down. The exchange is then an empty stand-in with the same id.
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let placeholder = Exchange::builder(exchange.exchange_id().to_string()).build();
        let taken = std::mem::replace(exchange, placeholder);
        *exchange = await_completion(&self.executor, self, taken)?;
        Ok(())
    }

    fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
        let service = self.service.clone();
        let step = self.name.clone();
        let exchange_id = exchange.exchange_id().to_string();
        let call = self
            .runtime
            .spawn(async move { service.oneshot(exchange).await });
        self.runtime.spawn(async move {
            let exchange = match call.await {
                Ok(Ok(exchange)) => exchange,
                Ok(Err(ServiceError {
                    mut exchange,
                    source,
                })) => {
                    trace!(exchange_id = %exchange.exchange_id(), step = %step, "service call failed");
                    exchange.set_failure(source);
                    exchange
                }
                Err(err) => {
                    warn!(exchange_id = %exchange_id, step = %step, error = %err, "service call aborted");
                    let failure = if err.is_panic() {
                        ExchangeFailure::from_panic(&step, err.into_panic().as_ref())
                    } else {
                        ExchangeFailure::Message(format!("service call in '{step}' was cancelled"))
                    };
                    let mut stand_in = Exchange::builder(exchange_id).build();
                    stand_in.set_failure(failure);
                    stand_in
                }
            };
            done(exchange, Completion::Async);
        });
        Completion::Async
    }
}

impl<S> fmt::Debug for ServiceStep<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::Value;
    use tower::service_fn;

    use super::*;
    use crate::dispatch::CallbackDropped;
    use crate::routing::Workflow;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    async fn shout(mut ex: Exchange) -> Result<Exchange, ServiceError> {
        tokio::task::yield_now().await;
        let body = ex.message().body.as_str().unwrap_or_default().to_uppercase();
        ex.message_mut().set_body(body);
        Ok(ex)
    }

    async fn refuse(ex: Exchange) -> Result<Exchange, ServiceError> {
        Err(ServiceError::new(ex, anyhow::anyhow!("downstream unavailable")))
    }

    #[test]
    fn completes_on_a_runtime_thread() {
        let rt = runtime();
        let executor = ReactiveExecutor::default();
        let step = ServiceStep::new("shout", service_fn(shout), rt.handle().clone(), executor);

        let mut ex = Exchange::builder("ex").body("hello").build();
        step.process(&mut ex).unwrap();

        assert_eq!(ex.exchange_id(), "ex");
        assert_eq!(ex.message().body, Value::from("HELLO"));
    }

    #[test]
    fn service_errors_become_exchange_failures() {
        let rt = runtime();
        let executor = ReactiveExecutor::default();
        let step: Arc<dyn Step> = Arc::new(ServiceStep::new(
            "refuse",
            service_fn(refuse),
            rt.handle().clone(),
            executor.clone(),
        ));
        let workflow = Workflow::builder("calls", step)
            .executor(executor.clone())
            .build();

        let ex = await_completion(&executor, &workflow, Exchange::builder("ex").build()).unwrap();

        assert!(matches!(ex.failure().map(|f| &**f), Some(ExchangeFailure::Step(_))));
        assert!(ex.is_done());
    }

    async fn explode(_ex: Exchange) -> Result<Exchange, ServiceError> {
        panic!("service exploded")
    }

    #[test]
    fn panicking_service_completes_with_a_failed_stand_in() {
        let rt = runtime();
        let step = ServiceStep::new(
            "explode",
            service_fn(explode),
            rt.handle().clone(),
            ReactiveExecutor::default(),
        );

        let mut ex = Exchange::builder("ex").body("lost").build();
        step.process(&mut ex).unwrap();

        assert_eq!(ex.exchange_id(), "ex");
        match ex.failure().map(|f| &**f) {
            Some(ExchangeFailure::Panicked { step, message }) => {
                assert_eq!(step, "explode");
                assert_eq!(message, "service exploded");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn shut_down_runtime_fails_instead_of_hanging() {
        let rt = runtime();
        let handle = rt.handle().clone();
        drop(rt);
        let step = ServiceStep::new("shout", service_fn(shout), handle, ReactiveExecutor::default());

        let mut ex = Exchange::builder("ex").body("hello").build();
        let err = step.process(&mut ex).unwrap_err();

        assert!(err.downcast_ref::<CallbackDropped>().is_some());
        assert_eq!(ex.exchange_id(), "ex");
    }

    #[test]
    fn shut_down_runtime_fails_a_transacted_workflow() {
        let rt = runtime();
        let handle = rt.handle().clone();
        drop(rt);
        let executor = ReactiveExecutor::default();
        let step: Arc<dyn Step> = Arc::new(ServiceStep::new(
            "shout",
            service_fn(shout),
            handle,
            executor.clone(),
        ));
        let workflow = Workflow::builder("calls", step)
            .executor(executor.clone())
            .build();
        let mut ex = Exchange::builder("ex").build();
        ex.set_transacted(true);

        let ex = await_completion(&executor, &workflow, ex).unwrap();

        assert!(matches!(ex.failure().map(|f| &**f), Some(ExchangeFailure::Step(_))));
    }
}
