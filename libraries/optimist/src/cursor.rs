//! Tracks the one item the user is looking at (the open chat, the opened notification).
//! Looking at an item consumes its weight.

use crate::resource::Resource;
use crate::store::{CollectionStore, Delta};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCursor<Id> {
    active: Option<Id>,
}

impl<Id> Default for ReadCursor<Id> {
    fn default() -> Self {
        Self { active: None }
    }
}

impl<Id: Clone + Eq> ReadCursor<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Id> {
        self.active.as_ref()
    }

    pub fn is_active(&self, id: &Id) -> bool {
        self.active.as_ref() == Some(id)
    }

    /// Make `id` the active item and consume its weight. Returns the weight consumed.
    ///
    /// An id that isn't loaded yet still becomes active; nothing in the store changes.
    pub fn select<R>(&mut self, store: &mut CollectionStore<R>, id: Id) -> u64
    where
        R: Resource<Id = Id>,
    {
        if self.is_active(&id) {
            return 0;
        }

        let consumed = Self::consume(store, &id);
        self.active = Some(id);
        consumed
    }

    pub fn deselect(&mut self) -> Option<Id> {
        self.active.take()
    }

    /// Consume every item's weight ("mark all read").
    pub fn reset_all<R>(&self, store: &mut CollectionStore<R>)
    where
        R: Resource<Id = Id>,
    {
        store.consume_all();
    }

    /// Consume the active item again after its contents were replaced by a refresh.
    pub fn reconsume<R>(&self, store: &mut CollectionStore<R>) -> u64
    where
        R: Resource<Id = Id>,
    {
        match &self.active {
            Some(id) => Self::consume(store, id),
            None => 0,
        }
    }

    fn consume<R>(store: &mut CollectionStore<R>, id: &Id) -> u64
    where
        R: Resource<Id = Id>,
    {
        let weight = store.weight(id).unwrap_or(0);
        if weight == 0 {
            return 0;
        }
        store.apply_delta(id, Delta::FieldChanged(0));
        weight - store.weight(id).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ToggleMode;

    #[derive(Clone, Debug, PartialEq)]
    struct Chat {
        id: &'static str,
        unread: u64,
    }

    struct Chats;

    impl Resource for Chats {
        type Id = &'static str;
        type Item = Chat;
        const NAME: &'static str = "chats";
        const TOGGLE_MODE: ToggleMode = ToggleMode::Flag;

        fn id(item: &Chat) -> &'static str {
            item.id
        }

        fn weight(item: &Chat) -> u64 {
            item.unread
        }

        fn set_weight(item: &mut Chat, weight: u64) {
            item.unread = weight;
        }
    }

    fn store_with(items: &[(&'static str, u64)]) -> CollectionStore<Chats> {
        let mut store = CollectionStore::new();
        store.replace_all(items.iter().map(|&(id, unread)| Chat { id, unread }));
        store
    }

    #[test]
    fn test_select_consumes_full_contribution() {
        let mut store = store_with(&[("a", 3)]);
        let mut cursor = ReadCursor::new();

        assert_eq!(cursor.select(&mut store, "a"), 3);
        assert_eq!(store.weight(&"a"), Some(0));
        assert_eq!(store.aggregate(), 0);
        assert_eq!(cursor.active(), Some(&"a"));
    }

    #[test]
    fn test_select_same_id_twice_is_noop() {
        let mut store = store_with(&[("a", 3)]);
        let mut cursor = ReadCursor::new();
        cursor.select(&mut store, "a");

        // new messages arrived while the chat was open
        store.apply_delta(&"a", Delta::FieldChanged(2));
        assert_eq!(cursor.select(&mut store, "a"), 0);
        assert_eq!(store.aggregate(), 2);
    }

    #[test]
    fn test_select_unknown_id_only_moves_cursor() {
        let mut store = store_with(&[("a", 1)]);
        let mut cursor = ReadCursor::new();

        assert_eq!(cursor.select(&mut store, "zzz"), 0);
        assert_eq!(cursor.active(), Some(&"zzz"));
        assert_eq!(store.aggregate(), 1);
    }

    #[test]
    fn test_deselect_keeps_aggregate() {
        let mut store = store_with(&[("a", 1), ("b", 2)]);
        let mut cursor = ReadCursor::new();
        cursor.select(&mut store, "a");

        assert_eq!(cursor.deselect(), Some("a"));
        assert_eq!(cursor.active(), None);
        assert_eq!(store.aggregate(), 2);
    }

    #[test]
    fn test_reset_all() {
        let mut store = store_with(&[("a", 1), ("b", 0), ("c", 4), ("d", 2), ("e", 0)]);
        assert_eq!(store.aggregate(), 7);

        ReadCursor::new().reset_all(&mut store);
        assert_eq!(store.aggregate(), 0);
        assert!(store.iter().all(|chat| chat.unread == 0));
    }

    #[test]
    fn test_reconsume_after_refresh() {
        let mut store = store_with(&[("a", 1), ("b", 2)]);
        let mut cursor = ReadCursor::new();
        cursor.select(&mut store, "b");

        store.replace_all(vec![Chat { id: "a", unread: 1 }, Chat { id: "b", unread: 5 }]);
        assert_eq!(cursor.reconsume(&mut store), 5);
        assert_eq!(store.aggregate(), 1);
    }
}
