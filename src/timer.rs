/*!
Timers for all objects that need to act after a delay

Time never advances on its own here: every operation takes the current
`Instant` so the owners can be driven by an event loop and by tests alike.
*/

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// An ordered set of deadlines, at most one per key
#[derive(Debug)]
pub struct TimerQueue<K: Eq + Hash + Clone> {
    deadlines: BTreeMap<(Instant, u64), K>,
    index: HashMap<K, (Instant, u64)>,
    seq: u64,
}

impl<K: Eq + Hash + Clone> Default for TimerQueue<K> {
    fn default() -> Self {
        TimerQueue::new()
    }
}

impl<K: Eq + Hash + Clone> TimerQueue<K> {
    pub fn new() -> TimerQueue<K> {
        TimerQueue {
            deadlines: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
        }
    }

    /// Arms the timer `key` to fire `delay` after `now`.
    /// A timer that is already armed for the same key is replaced.
    pub fn register(&mut self, key: K, now: Instant, delay: Duration) {
        self.cancel(&key);
        let slot = (now + delay, self.seq);
        self.seq = self.seq.wrapping_add(1);
        self.deadlines.insert(slot, key.clone());
        self.index.insert(key, slot);
    }

    /// Disarms the timer `key`, returns whether it was armed
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.deadlines.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Cancels all timers that satisfy the predicate
    pub fn cancel_where<F: Fn(&K) -> bool>(&mut self, pred: F) {
        let keys: Vec<K> = self.index.keys().filter(|k| pred(k)).cloned().collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn pending(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// The deadline of the timer `key`, if armed
    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.index.get(key).map(|slot| slot.0)
    }

    /// The earliest deadline of all armed timers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|slot| slot.0)
    }

    /// Disarms and returns all timers whose deadline is not after `now`, earliest first
    pub fn expired(&mut self, now: Instant) -> Vec<K> {
        let mut fired = vec![];
        loop {
            let slot = match self.deadlines.keys().next() {
                Some(slot) if slot.0 <= now => *slot,
                _ => break,
            };
            if let Some(key) = self.deadlines.remove(&slot) {
                self.index.remove(&key);
                fired.push(key);
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.index.clear();
    }
}

/// The scheduling capability of a timer owning object
pub trait Scheduler {
    /// The kinds of timers the object uses
    type Kind;

    fn register_timer(&mut self, kind: Self::Kind, now: Instant, delay: Duration);

    fn cancel_timer(&mut self, kind: &Self::Kind) -> bool;

    fn pending_timer(&self, kind: &Self::Kind) -> bool;
}

/// The callback side of `Scheduler`: processes all timers that are due
pub trait HandleTimeout {
    type Output;

    fn handle_timeout(&mut self, now: Instant) -> Self::Output;

    /// When `handle_timeout` has to be called next
    fn next_timeout(&self) -> Option<Instant>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        timers.register("b", now, Duration::from_secs(2));
        timers.register("a", now, Duration::from_secs(1));
        timers.register("c", now, Duration::from_secs(3));
        assert_eq!(Some(now + Duration::from_secs(1)), timers.next_deadline());
        assert!(timers.expired(now).is_empty());
        assert_eq!(vec!["a", "b"], timers.expired(now + Duration::from_secs(2)));
        assert_eq!(1, timers.len());
    }

    #[test]
    fn register_replaces() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        timers.register(1, now, Duration::from_secs(1));
        timers.register(1, now, Duration::from_secs(5));
        assert_eq!(1, timers.len());
        assert!(timers.expired(now + Duration::from_secs(2)).is_empty());
        assert_eq!(vec![1], timers.expired(now + Duration::from_secs(5)));
    }

    #[test]
    fn cancel() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        timers.register(1, now, Duration::from_secs(1));
        timers.register(2, now, Duration::from_secs(1));
        assert!(timers.cancel(&1));
        assert!(!timers.cancel(&1));
        assert!(!timers.pending(&1));
        timers.cancel_where(|k| *k == 2);
        assert!(timers.is_empty());
        assert_eq!(None, timers.next_deadline());
    }

    #[test]
    fn same_deadline_keeps_insertion_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        for i in 0..5 {
            timers.register(i, now, Duration::from_secs(0));
        }
        assert_eq!(vec![0, 1, 2, 3, 4], timers.expired(now));
    }
}
