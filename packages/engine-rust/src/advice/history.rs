use relay_core::{ClockSource, Exchange, HistoryEntry};

use super::chain::{Advice, AdviceState};

/// Appends a [`HistoryEntry`] for every step the exchange passes through.
#[derive(Debug, Clone)]
pub struct MessageHistoryAdvice {
    node: String,
    route_id: Option<String>,
}

impl MessageHistoryAdvice {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            route_id: None,
        }
    }

    #[must_use]
    pub fn in_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }
}

impl Advice for MessageHistoryAdvice {
    fn name(&self) -> &str {
        "message-history"
    }

    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, exchange: &mut Exchange) -> anyhow::Result<Option<AdviceState>> {
        let started: u64 = exchange.clock().source().now();
        Ok(Some(AdviceState::new(started)))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> anyhow::Result<()> {
        let now = exchange.clock().source().now();
        let started = state
            .and_then(|s| s.downcast::<u64>().ok())
            .unwrap_or(now);
        exchange.push_history(HistoryEntry {
            node: self.node.clone(),
            route_id: self.route_id.clone(),
            started_millis: started,
            elapsed_millis: now.saturating_sub(started),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::ManualClock;

    use super::*;

    #[test]
    fn records_node_and_elapsed_time() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut ex = Exchange::builder("ex-1")
            .clock_source(Arc::clone(&clock) as Arc<dyn ClockSource>)
            .build();
        let advice = MessageHistoryAdvice::new("enrich").in_route("orders");

        let state = advice.before(&mut ex).unwrap();
        clock.advance(25);
        advice.after(&mut ex, state).unwrap();

        assert_eq!(
            ex.history(),
            &[HistoryEntry {
                node: "enrich".to_string(),
                route_id: Some("orders".to_string()),
                started_millis: 1_000,
                elapsed_millis: 25,
            }]
        );
    }
}
