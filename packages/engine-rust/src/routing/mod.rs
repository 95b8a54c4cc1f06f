//! Composition on top of dispatch: pipelines of steps, workflows that wrap a
//! step in the configured advices, and `tower` adapters in both directions.

mod pipeline;
mod service;
mod service_step;
mod workflow;

pub use pipeline::Pipeline;
pub use service::{RoutingError, RoutingService};
pub use service_step::{ServiceError, ServiceStep};
pub use workflow::{Workflow, WorkflowBuilder};
