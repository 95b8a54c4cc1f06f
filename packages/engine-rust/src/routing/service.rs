use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use relay_core::Exchange;
use thiserror::Error;
use tokio::sync::oneshot;
use tower::Service;

use crate::dispatch::Step;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("step dropped the exchange without completing it")]
    Dropped,
}

/// Exposes a step as a `tower` service.
///
/// The response is the exchange as it came out of the step, failures
/// included. `Err` only means the step never completed.
#[derive(Clone)]
pub struct RoutingService {
    step: Arc<dyn Step>,
}

impl RoutingService {
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self { step }
    }
}

impl Service<Exchange> for RoutingService {
    type Response = Exchange;
    type Error = RoutingError;
    type Future = BoxFuture<'static, Result<Exchange, RoutingError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let (tx, rx) = oneshot::channel();
        self.step.process_async(
            exchange,
            Box::new(move |exchange, _| {
                let _ = tx.send(exchange);
            }),
        );
        Box::pin(async move { rx.await.map_err(|_| RoutingError::Dropped) })
    }
}

#[cfg(test)]
mod tests {
    use relay_core::Value;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::dispatch::{Completion, DoneCallback, FnStep};
    use crate::reactive::ReactiveExecutor;
    use crate::routing::{Pipeline, ServiceError, ServiceStep, Workflow};

    fn reverse() -> Arc<dyn Step> {
        Arc::new(FnStep::new("reverse", |ex: &mut Exchange| {
            let text = ex.message().body.as_str().unwrap_or_default();
            let body: String = text.chars().rev().collect();
            ex.message_mut().set_body(body);
            Ok(())
        }))
    }

    #[tokio::test]
    async fn resolves_with_the_routed_exchange() {
        let workflow = Workflow::builder("reverse", reverse()).build();
        let service = RoutingService::new(Arc::new(workflow));

        let ex = service
            .oneshot(Exchange::builder("ex").body("abc").build())
            .await
            .unwrap();

        assert_eq!(ex.message().body, Value::from("cba"));
        assert!(ex.is_done());
    }

    #[tokio::test]
    async fn failed_exchanges_are_still_responses() {
        let failing: Arc<dyn Step> =
            Arc::new(FnStep::new("fail", |_: &mut Exchange| Err(anyhow::anyhow!("bad input"))));
        let service = RoutingService::new(Arc::new(Workflow::builder("fail", failing).build()));

        let ex = service.oneshot(Exchange::builder("ex").build()).await.unwrap();

        assert!(ex.is_failed());
    }

    #[tokio::test]
    async fn dropped_callback_is_reported() {
        struct Swallow;

        impl Step for Swallow {
            fn process(&self, _exchange: &mut Exchange) -> anyhow::Result<()> {
                Ok(())
            }

            fn process_async(&self, _exchange: Exchange, _done: DoneCallback) -> Completion {
                Completion::Async
            }
        }

        let service = RoutingService::new(Arc::new(Swallow));
        let result = service.oneshot(Exchange::builder("ex").build()).await;
        assert_eq!(result.unwrap_err(), RoutingError::Dropped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_services_inside_a_workflow() {
        let executor = ReactiveExecutor::default();
        let remote: Arc<dyn Step> = Arc::new(ServiceStep::new(
            "remote",
            service_fn(|mut ex: Exchange| async move {
                tokio::task::yield_now().await;
                ex.message_mut().set_header("enriched", true);
                Ok::<_, ServiceError>(ex)
            }),
            tokio::runtime::Handle::current(),
            executor.clone(),
        ));
        let pipeline = Pipeline::new("enrich", vec![reverse(), remote], executor.clone());
        let workflow = Workflow::builder("enrich", Arc::new(pipeline))
            .executor(executor)
            .build();
        let service = RoutingService::new(Arc::new(workflow));

        let ex = service
            .oneshot(Exchange::builder("ex").body("abc").build())
            .await
            .unwrap();

        assert_eq!(ex.message().body, Value::from("cba"));
        assert_eq!(ex.message().header("enriched"), Some(&Value::from(true)));
        assert!(ex.is_done());
    }
}
