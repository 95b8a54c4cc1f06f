use std::fmt;
use std::sync::Arc;

use relay_core::Exchange;
use tracing::debug;

use crate::advice::{
    Advice, AdviceChain, InflightAdvice, InflightRegistry, MessageHistoryAdvice, MetricsAdvice,
    TracingAdvice, UnitOfWorkAdvice,
};
use crate::config::AdviceConfig;
use crate::dispatch::{AdvisedStep, AfterProcessHook, Completion, DoneCallback, Step};
use crate::reactive::ReactiveExecutor;
use crate::shutdown::ShutdownController;

/// A named step together with the advices configured for it.
///
/// Built-in advices run in a fixed order: unit of work, tracing, in-flight
/// tracking, metrics, then message history. Extra advices follow them.
#[derive(Clone)]
pub struct Workflow {
    id: String,
    advised: AdvisedStep,
    inflight: Option<Arc<InflightRegistry>>,
}

impl Workflow {
    pub fn builder(id: impl Into<String>, step: Arc<dyn Step>) -> WorkflowBuilder {
        WorkflowBuilder {
            id: id.into(),
            step,
            executor: None,
            advice: AdviceConfig::default(),
            extra: Vec::new(),
            shutdown: None,
            inflight: None,
            after_process: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry counting exchanges currently inside this workflow, if
    /// in-flight tracking is enabled.
    #[must_use]
    pub fn inflight(&self) -> Option<&Arc<InflightRegistry>> {
        self.inflight.as_ref()
    }

    #[must_use]
    pub fn chain(&self) -> &AdviceChain {
        self.advised.chain()
    }

    #[must_use]
    pub fn executor(&self) -> &ReactiveExecutor {
        self.advised.executor()
    }

    pub fn dispatch(&self, exchange: Exchange, callback: DoneCallback) -> Completion {
        self.advised.dispatch(exchange, callback)
    }
}

impl Step for Workflow {
    fn name(&self) -> &str {
        &self.id
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        self.advised.process(exchange)
    }

    fn process_async(&self, exchange: Exchange, done: DoneCallback) -> Completion {
        self.advised.dispatch(exchange, done)
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("advices", &self.advised.chain().len())
            .finish_non_exhaustive()
    }
}

pub struct WorkflowBuilder {
    id: String,
    step: Arc<dyn Step>,
    executor: Option<ReactiveExecutor>,
    advice: AdviceConfig,
    extra: Vec<Arc<dyn Advice>>,
    shutdown: Option<Arc<ShutdownController>>,
    inflight: Option<Arc<InflightRegistry>>,
    after_process: Option<AfterProcessHook>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn executor(mut self, executor: ReactiveExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn advice_config(mut self, config: &AdviceConfig) -> Self {
        self.advice = config.clone();
        self
    }

    /// Appends an advice after the built-in ones.
    #[must_use]
    pub fn advice(mut self, advice: impl Advice + 'static) -> Self {
        self.extra.push(Arc::new(advice));
        self
    }

    #[must_use]
    pub fn shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Shares an in-flight registry with other workflows.
    #[must_use]
    pub fn inflight_registry(mut self, registry: Arc<InflightRegistry>) -> Self {
        self.inflight = Some(registry);
        self
    }

    #[must_use]
    pub fn after_process(mut self, hook: AfterProcessHook) -> Self {
        self.after_process = Some(hook);
        self
    }

    pub fn build(self) -> Workflow {
        let config = &self.advice;
        let mut chain = AdviceChain::builder();

        if config.unit_of_work {
            let advice = UnitOfWorkAdvice::new(self.id.clone());
            chain = chain.advice(if config.diagnostic_context {
                advice.with_diagnostic_context()
            } else {
                advice
            });
        }
        if config.tracing {
            chain = chain.advice(TracingAdvice::new(self.id.clone()));
        }
        let inflight = if config.inflight {
            let registry = self
                .inflight
                .unwrap_or_else(|| Arc::new(InflightRegistry::new()));
            let mut advice = InflightAdvice::new(self.id.clone(), Arc::clone(&registry));
            if let Some(shutdown) = &self.shutdown {
                advice = advice.with_shutdown(Arc::clone(shutdown));
            }
            chain = chain.advice(advice);
            Some(registry)
        } else {
            None
        };
        if config.metrics {
            chain = chain.advice(MetricsAdvice::new(self.id.clone()));
        }
        if config.message_history {
            let node = self.step.name().to_string();
            chain = chain.advice(MessageHistoryAdvice::new(node).in_route(self.id.clone()));
        }
        for advice in self.extra {
            chain = chain.shared(advice);
        }
        let chain = chain.build();
        debug!(workflow = %self.id, advices = chain.len(), "workflow built");

        let mut advised = AdvisedStep::new(chain, self.executor.unwrap_or_default())
            .with_step(self.step)
            .named(self.id.clone());
        if let Some(shutdown) = self.shutdown {
            advised = advised.with_shutdown(shutdown);
        }
        if let Some(hook) = self.after_process {
            advised = advised.with_after_process(hook);
        }

        Workflow {
            id: self.id,
            advised,
            inflight,
        }
    }
}
