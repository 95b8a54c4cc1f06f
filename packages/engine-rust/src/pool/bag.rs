use crossbeam_queue::ArrayQueue;
use relay_core::Exchange;

/// Bounded bag of idle exchanges. Offer and poll never take a lock.
#[derive(Debug)]
pub(crate) struct ExchangeBag {
    idle: ArrayQueue<Exchange>,
}

impl ExchangeBag {
    /// `capacity` must be non-zero.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity),
        }
    }

    pub(crate) fn poll(&self) -> Option<Exchange> {
        self.idle.pop()
    }

    /// Gives the exchange back when the bag is already full.
    pub(crate) fn offer(&self, exchange: Exchange) -> Result<(), Exchange> {
        self.idle.push(exchange)
    }

    pub(crate) fn len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn drain(&self) -> usize {
        std::iter::from_fn(|| self.idle.pop()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn offer_respects_capacity() {
        let bag = ExchangeBag::new(1);

        assert!(bag.offer(Exchange::builder("a").build()).is_ok());
        let rejected = bag.offer(Exchange::builder("b").build()).unwrap_err();

        assert_eq!(rejected.exchange_id(), "b");
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.poll().map(|ex| ex.exchange_id().to_string()), Some("a".to_string()));
        assert!(bag.poll().is_none());
    }

    #[test]
    fn drain_empties_the_bag() {
        let bag = ExchangeBag::new(4);
        bag.offer(Exchange::builder("a").build()).unwrap();
        bag.offer(Exchange::builder("b").build()).unwrap();

        assert_eq!(bag.drain(), 2);
        assert_eq!(bag.len(), 0);
    }

    #[test]
    fn concurrent_offers_and_polls_keep_count() {
        let bag = Arc::new(ExchangeBag::new(8));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bag = Arc::clone(&bag);
                thread::spawn(move || {
                    let (mut kept, mut taken) = (0_usize, 0_usize);
                    for i in 0..50 {
                        if bag.offer(Exchange::builder(format!("{t}-{i}")).build()).is_ok() {
                            kept += 1;
                        }
                        if i % 2 == 0 && bag.poll().is_some() {
                            taken += 1;
                        }
                    }
                    (kept, taken)
                })
            })
            .collect();
        let (kept, taken) = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .fold((0, 0), |(k, t), (kept, taken)| (k + kept, t + taken));

        assert!(bag.len() <= 8);
        assert_eq!(bag.len(), kept - taken);
        assert_eq!(bag.drain(), kept - taken);
    }
}
