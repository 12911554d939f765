// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Listener registration shared by the event emitters in this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of listeners behind a lock.
///
/// Dispatch takes a snapshot first, so listeners may register or
/// unregister from inside a callback.
pub struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<(ListenerId, Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener. Returns an ID that can be used to unregister it.
    pub fn register(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn clear(&self) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// Invoke `f` for every registered listener.
    pub fn notify(&self, mut f: impl FnMut(&L)) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    struct TestCounter(AtomicUsize);

    impl Counter for TestCounter {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_register_and_notify() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let counter = Arc::new(TestCounter(AtomicUsize::new(0)));
        let id = set.register(counter.clone());
        set.register(counter.clone());
        assert_eq!(set.len(), 2);

        set.notify(|l| l.hit());
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);

        set.unregister(id);
        set.notify(|l| l.hit());
        assert_eq!(counter.0.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_ids_are_unique_per_set() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let counter = Arc::new(TestCounter(AtomicUsize::new(0)));
        let a = set.register(counter.clone());
        let b = set.register(counter);
        assert_ne!(a, b);
        set.clear();
        assert!(set.is_empty());
    }
}
