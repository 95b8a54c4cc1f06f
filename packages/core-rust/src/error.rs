use std::fmt;

/// Which side of an advice raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvicePhase {
    Before,
    After,
}

impl fmt::Display for AdvicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// Failure carried on an exchange.
///
/// Failures are never thrown across the asynchronous boundary; they travel on
/// the exchange and the submitter inspects them once its callback fires.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeFailure {
    #[error("step failed: {0}")]
    Step(#[from] anyhow::Error),
    #[error("step '{step}' panicked: {message}")]
    Panicked { step: String, message: String },
    #[error("advice '{advice}' failed in {phase}: {source}")]
    Advice {
        advice: String,
        phase: AdvicePhase,
        #[source]
        source: anyhow::Error,
    },
    #[error("rejected: {reason}")]
    Rejected { reason: String },
    #[error("{0}")]
    Message(String),
}

impl ExchangeFailure {
    /// Builds a [`ExchangeFailure::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(step: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        Self::Panicked {
            step: step.to_string(),
            message: panic_message(payload),
        }
    }
}

/// Extracts a readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Errors from finalizing an exchange's unit of work.
#[derive(Debug, thiserror::Error)]
pub enum FinalizationError {
    #[error("{failed} of {total} synchronizations panicked")]
    SynchronizationPanicked { failed: usize, total: usize },
}
