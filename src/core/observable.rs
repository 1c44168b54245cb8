//! Subscribe/unsubscribe fan-out over `mpsc` channels.

use std::sync::mpsc;

/// Handle returned by [`Subscribers::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Subscribers<T> {
    next_id: u64,
    senders: Vec<(SubscriptionId, mpsc::Sender<T>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> Subscribers<T> {
    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::Receiver<T>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::channel();
        self.senders.push((id, tx));
        (id, rx)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    /// Delivers `value` to every live subscriber; dropped receivers are pruned.
    pub fn emit(&mut self, value: &T) {
        self.senders.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let mut subs = Subscribers::default();
        let (a, rx_a) = subs.subscribe();
        let (_b, rx_b) = subs.subscribe();

        subs.emit(&1);
        assert!(subs.unsubscribe(a));
        assert!(!subs.unsubscribe(a));
        subs.emit(&2);

        assert_eq!(rx_a.try_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(rx_b.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_dropped_receiver_pruned() {
        let mut subs = Subscribers::default();
        let (id, rx) = subs.subscribe();
        drop(rx);
        subs.emit(&"x");
        // Already pruned by the emit.
        assert!(!subs.unsubscribe(id));
    }
}
