use std::collections::{HashSet, VecDeque};

use peerchat_core::DeliveryKey;

/// Remembers the most recent delivery keys so a message that arrives over
/// both the relay and a direct link is shown once. Oldest keys are evicted
/// first once `capacity` is reached.
#[derive(Debug)]
pub struct DeliveryFilter {
    capacity: usize,
    order: VecDeque<DeliveryKey>,
    seen: HashSet<DeliveryKey>,
}

impl DeliveryFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` the first time a key is seen within the window.
    pub fn admit(&mut self, key: DeliveryKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> DeliveryKey {
        DeliveryKey::Id(id.to_owned())
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut filter = DeliveryFilter::new(4);
        assert!(filter.admit(key("m1")));
        assert!(!filter.admit(key("m1")));
        let fallback = DeliveryKey::SenderTimestamp {
            sender_id: "user-b".to_owned(),
            timestamp_unix_ms: 10,
        };
        assert!(filter.admit(fallback.clone()));
        assert!(!filter.admit(fallback));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut filter = DeliveryFilter::new(2);
        assert!(filter.admit(key("a")));
        assert!(filter.admit(key("b")));
        assert!(filter.admit(key("c")));
        assert_eq!(filter.len(), 2);
        assert!(filter.admit(key("a")));
        assert!(!filter.admit(key("c")));
    }
}
