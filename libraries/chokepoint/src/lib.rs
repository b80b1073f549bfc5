//! Per-key serialization of async work.
//!
//! A [`ChokePoint`] hands out one [`Passage`] per key at a time. A second caller asking for the
//! same key waits until the first passage is dropped, so work on one key never overlaps while
//! work on different keys runs freely.

use dashmap::DashMap;
use futures::lock::{Mutex, OwnedMutexGuard};
use std::hash::Hash;
use std::sync::Arc;

pub struct ChokePoint<K>
where
    K: Eq + Hash,
{
    gates: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> ChokePoint<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            gates: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive passage on `key`.
    pub async fn enter(&self, key: K) -> Passage<K> {
        // clone the gate out so the map shard isn't locked while we wait
        let gate = Arc::clone(
            self.gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let queued = Queued {
            key: &key,
            gates: &self.gates,
            gate,
        };
        let guard = Arc::clone(&queued.gate).lock_owned().await;
        drop(queued);

        Passage {
            key,
            gates: Arc::clone(&self.gates),
            guard: Some(guard),
        }
    }

    /// True while a passage for `key` is held or awaited.
    pub fn is_busy(&self, key: &K) -> bool {
        self.gates.contains_key(key)
    }

    /// Number of keys with a held or awaited passage.
    pub fn busy_keys(&self) -> usize {
        self.gates.len()
    }
}

impl<K> Default for ChokePoint<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A caller waiting on a gate. If the wait is abandoned and nobody else holds or awaits the
/// gate, the key is released.
struct Queued<'a, K>
where
    K: Eq + Hash,
{
    key: &'a K,
    gates: &'a DashMap<K, Arc<Mutex<()>>>,
    gate: Arc<Mutex<()>>,
}

impl<K> Drop for Queued<'_, K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // the map and this waiter are the only references left
        self.gates.remove_if(self.key, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
    }
}

pub struct Passage<K>
where
    K: Eq + Hash,
{
    key: K,
    gates: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Passage<K>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for Passage<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // release first, so a waiter's clone is the only other reference left
        self.guard.take();
        // waiters hold their own clone of the gate, so it is only removed once nobody is queued
        self.gates
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::cell::RefCell;

    #[test]
    fn test_same_key_waits_for_release() {
        let choke = ChokePoint::new();
        let order = RefCell::new(Vec::new());
        let (release, released) = oneshot::channel::<()>();

        let first = async {
            let _passage = choke.enter("a").await;
            order.borrow_mut().push("first entered");
            released.await.unwrap();
            order.borrow_mut().push("first left");
        };
        let second = async {
            let _passage = choke.enter("a").await;
            order.borrow_mut().push("second entered");
        };
        let releaser = async {
            order.borrow_mut().push("releasing");
            release.send(()).unwrap();
        };

        block_on(async { futures::join!(first, second, releaser) });

        assert_eq!(
            *order.borrow(),
            vec!["first entered", "releasing", "first left", "second entered"]
        );
        assert_eq!(choke.busy_keys(), 0);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let choke = ChokePoint::new();
        block_on(async {
            let a = choke.enter("a").await;
            let b = choke.enter("b").await;
            assert!(choke.is_busy(&"a"));
            assert!(choke.is_busy(&"b"));
            assert_eq!(a.key(), &"a");
            drop(a);
            assert!(!choke.is_busy(&"a"));
            drop(b);
        });
        assert_eq!(choke.busy_keys(), 0);
    }

    #[test]
    fn test_abandoned_waiter_releases_key() {
        let choke = ChokePoint::new();
        let held = block_on(choke.enter("a"));
        let mut waiting = Box::pin(choke.enter("a"));
        assert!(waiting.as_mut().now_or_never().is_none());

        drop(held);
        assert!(choke.is_busy(&"a"));
        drop(waiting);
        assert!(!choke.is_busy(&"a"));

        // abandoned while the key is still held: the holder releases it
        let held = block_on(choke.enter("a"));
        let mut waiting = Box::pin(choke.enter("a"));
        assert!(waiting.as_mut().now_or_never().is_none());
        drop(waiting);
        assert!(choke.is_busy(&"a"));
        drop(held);
        assert_eq!(choke.busy_keys(), 0);

        block_on(async {
            let _passage = choke.enter("a").await;
            assert!(choke.is_busy(&"a"));
        });
        assert_eq!(choke.busy_keys(), 0);
    }
}
