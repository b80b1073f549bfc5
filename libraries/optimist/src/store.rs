//! # CollectionStore
//! The client's copy of one collection, plus its aggregate.
//! Every method that changes an item's weight adjusts the aggregate in the same call,
//! so `aggregate() == recount()` holds after every transition.

use indexmap::IndexMap;

use crate::resource::Resource;

/// A change to a single item.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta<Item> {
    /// Insert, or replace the item already stored under this id.
    Added(Item),
    Removed,
    /// Set the item's weight.
    FieldChanged(u64),
}

/// An item's state before a mutation, for rollback.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot<Item> {
    Absent,
    Present { index: usize, item: Item },
}

impl<Item> Snapshot<Item> {
    pub fn item(&self) -> Option<&Item> {
        match self {
            Snapshot::Absent => None,
            Snapshot::Present { item, .. } => Some(item),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Snapshot::Present { .. })
    }
}

#[derive(Debug)]
pub struct CollectionStore<R: Resource> {
    items: IndexMap<R::Id, R::Item>,
    aggregate: u64,
}

impl<R: Resource> Clone for CollectionStore<R> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            aggregate: self.aggregate,
        }
    }
}

impl<R: Resource> Default for CollectionStore<R> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
            aggregate: 0,
        }
    }
}

impl<R: Resource> CollectionStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the collection exactly `items`. A duplicated id keeps the last copy.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = R::Item>) {
        self.items = items
            .into_iter()
            .map(|item| (R::id(&item), item))
            .collect();
        self.aggregate = self.recount();
    }

    /// Apply one change. Returns whether anything changed.
    ///
    /// `Removed` and `FieldChanged` on an unknown id do nothing, so duplicated events are harmless.
    pub fn apply_delta(&mut self, id: &R::Id, delta: Delta<R::Item>) -> bool {
        match delta {
            Delta::Added(item) => {
                let key = R::id(&item);
                if &key != id {
                    log::warn!(
                        "{}: item added under {id:?} reports id {key:?}, storing it under {id:?}",
                        R::NAME
                    );
                }
                let added = R::weight(&item);
                let previous = self.items.insert(id.clone(), item);
                let removed = previous.as_ref().map(R::weight).unwrap_or(0);
                self.adjust(removed, added);
                true
            }
            Delta::Removed => match self.items.shift_remove(id) {
                Some(item) => {
                    self.adjust(R::weight(&item), 0);
                    true
                }
                None => false,
            },
            Delta::FieldChanged(weight) => {
                let Some(item) = self.items.get_mut(id) else {
                    return false;
                };
                let before = R::weight(item);
                R::set_weight(item, weight);
                let after = R::weight(item);
                self.adjust(before, after);
                before != after
            }
        }
    }

    /// Zero every weight in one transition.
    pub fn consume_all(&mut self) {
        for item in self.items.values_mut() {
            R::set_weight(item, 0);
        }
        // measured, so an item that can't drop its weight still counts
        self.aggregate = self.recount();
    }

    pub fn snapshot(&self, id: &R::Id) -> Snapshot<R::Item> {
        match self.items.get_full(id) {
            Some((index, _, item)) => Snapshot::Present {
                index,
                item: item.clone(),
            },
            None => Snapshot::Absent,
        }
    }

    /// Put an item back exactly as it was snapshotted, position included.
    pub fn restore(&mut self, id: &R::Id, snapshot: Snapshot<R::Item>) {
        match snapshot {
            Snapshot::Absent => {
                self.apply_delta(id, Delta::Removed);
            }
            Snapshot::Present { index, item } => {
                let added = R::weight(&item);
                let removed = self
                    .items
                    .shift_remove(id)
                    .as_ref()
                    .map(R::weight)
                    .unwrap_or(0);
                let index = index.min(self.items.len());
                self.items.shift_insert(index, id.clone(), item);
                self.adjust(removed, added);
            }
        }
    }

    pub fn get(&self, id: &R::Id) -> Option<&R::Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.items.contains_key(id)
    }

    pub fn weight(&self, id: &R::Id) -> Option<u64> {
        self.items.get(id).map(R::weight)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R::Item> {
        self.items.values()
    }

    pub fn get_all(&self) -> Vec<R::Item> {
        self.items.values().cloned().collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &R::Id> {
        self.items.keys()
    }

    pub fn aggregate(&self) -> u64 {
        self.aggregate
    }

    /// The aggregate computed from scratch.
    pub fn recount(&self) -> u64 {
        self.items.values().map(R::weight).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn adjust(&mut self, removed: u64, added: u64) {
        debug_assert!(self.aggregate >= removed, "aggregate underflow");
        self.aggregate = self.aggregate.saturating_sub(removed) + added;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ToggleMode;

    #[derive(Clone, Debug, PartialEq)]
    struct Thread {
        id: u32,
        unread: u64,
    }

    struct Threads;

    impl Resource for Threads {
        type Id = u32;
        type Item = Thread;
        const NAME: &'static str = "threads";
        const TOGGLE_MODE: ToggleMode = ToggleMode::Flag;

        fn id(item: &Thread) -> u32 {
            item.id
        }

        fn weight(item: &Thread) -> u64 {
            item.unread
        }

        fn set_weight(item: &mut Thread, weight: u64) {
            item.unread = weight;
        }
    }

    fn thread(id: u32, unread: u64) -> Thread {
        Thread { id, unread }
    }

    fn store_with(items: &[(u32, u64)]) -> CollectionStore<Threads> {
        let mut store = CollectionStore::new();
        store.replace_all(items.iter().map(|&(id, unread)| thread(id, unread)));
        store
    }

    #[test]
    fn test_replace_all_recomputes_aggregate() {
        let mut store = store_with(&[(1, 2), (2, 0), (3, 5)]);
        assert_eq!(store.aggregate(), 7);
        assert_eq!(store.len(), 3);

        store.replace_all(vec![thread(4, 1)]);
        assert_eq!(store.aggregate(), 1);
        assert!(!store.contains(&1));
    }

    #[test]
    fn test_replace_all_duplicate_ids_keep_last() {
        let store = store_with(&[(1, 2), (1, 3)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.aggregate(), 3);
    }

    #[test]
    fn test_added_upserts_without_double_counting() {
        let mut store = store_with(&[(1, 2)]);
        assert!(store.apply_delta(&2, Delta::Added(thread(2, 4))));
        assert_eq!(store.aggregate(), 6);

        store.apply_delta(&2, Delta::Added(thread(2, 1)));
        assert_eq!(store.aggregate(), 3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.aggregate(), store.recount());
    }

    #[test]
    fn test_removed_twice_is_idempotent() {
        let mut store = store_with(&[(1, 2), (2, 3)]);
        assert!(store.apply_delta(&1, Delta::Removed));
        let after_first = store.clone();

        assert!(!store.apply_delta(&1, Delta::Removed));
        assert_eq!(store.get_all(), after_first.get_all());
        assert_eq!(store.aggregate(), after_first.aggregate());
        assert_eq!(store.aggregate(), 3);
    }

    #[test]
    fn test_field_changed_adjusts_by_difference() {
        let mut store = store_with(&[(1, 3), (2, 1)]);
        store.apply_delta(&1, Delta::FieldChanged(0));
        assert_eq!(store.aggregate(), 1);

        store.apply_delta(&2, Delta::FieldChanged(6));
        assert_eq!(store.aggregate(), 6);
        assert_eq!(store.weight(&2), Some(6));
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut store = store_with(&[(1, 3)]);
        assert!(!store.apply_delta(&9, Delta::FieldChanged(4)));
        assert!(!store.apply_delta(&9, Delta::Removed));
        assert_eq!(store.aggregate(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_consume_all() {
        let mut store = store_with(&[(1, 1), (2, 0), (3, 4), (4, 2), (5, 0)]);
        assert_eq!(store.aggregate(), 7);

        store.consume_all();
        assert_eq!(store.aggregate(), 0);
        assert!(store.iter().all(|t| t.unread == 0));
    }

    #[test]
    fn test_restore_puts_item_back_in_place() {
        let mut store = store_with(&[(1, 1), (2, 2), (3, 3)]);
        let snapshot = store.snapshot(&2);
        assert!(snapshot.is_present());

        store.apply_delta(&2, Delta::Removed);
        assert_eq!(store.aggregate(), 4);

        store.restore(&2, snapshot);
        assert_eq!(store.ids().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(store.aggregate(), 6);
    }

    #[test]
    fn test_restore_absent_removes() {
        let mut store = store_with(&[(1, 1)]);
        let snapshot = store.snapshot(&2);
        assert_eq!(snapshot, Snapshot::Absent);

        store.apply_delta(&2, Delta::Added(thread(2, 5)));
        store.restore(&2, snapshot);
        assert!(!store.contains(&2));
        assert_eq!(store.aggregate(), 1);
    }
}
