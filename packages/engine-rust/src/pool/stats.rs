use std::sync::atomic::{AtomicU64, Ordering};

/// Pool usage counters. Silent when disabled.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    enabled: bool,
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// Instances allocated because the pool was empty.
    pub created: u64,
    /// Instances taken from the pool.
    pub acquired: u64,
    /// Instances returned to the pool.
    pub released: u64,
    /// Instances dropped instead of pooled.
    pub discarded: u64,
}

impl PoolStatistics {
    /// Instances handed out but never released or discarded.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        (self.created + self.acquired).saturating_sub(self.released + self.discarded)
    }

    /// Whether the counters satisfy `created + acquired >= released + discarded`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.created + self.acquired >= self.released + self.discarded
    }
}

macro_rules! tally {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name(&self) {
            if self.enabled {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        }
    };
}

impl PoolStats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    tally!(record_created, created);
    tally!(record_acquired, acquired);
    tally!(record_released, released);
    tally!(record_discarded, discarded);

    pub(crate) fn snapshot(&self) -> PoolStatistics {
        PoolStatistics {
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [&self.created, &self.acquired, &self.released, &self.discarded] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
