use std::rc::Rc;

use slotmap::SlotMap;

use crate::gateway::GatewayError;
use crate::resource::ToggleStatus;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

/// Something observable that happened while reconciling with the server.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<Id> {
    /// The server confirmed a local change.
    Committed { id: Id, status: ToggleStatus },
    /// The server disagreed with the optimistic guess and its answer was applied.
    Conflict {
        id: Id,
        guessed: ToggleStatus,
        actual: ToggleStatus,
    },
    /// A call failed and the local change was undone. `id` is `None` for bulk operations.
    RolledBack { id: Option<Id>, error: GatewayError },
    /// A full refresh replaced the collection.
    Refreshed { items: usize, aggregate: u64 },
    /// One item was replaced by the server's current copy.
    ItemRefreshed { id: Id, weight: u64 },
    /// A full refresh arrived after newer local state and was thrown away.
    StaleSnapshot { seq: u64 },
    /// A completion arrived after the coordinator was closed.
    Dropped { operation: &'static str },
}

type Listener<Id> = Rc<dyn Fn(&SyncEvent<Id>)>;

pub(crate) struct Listeners<Id> {
    listeners: SlotMap<ListenerKey, Listener<Id>>,
    queued: Vec<SyncEvent<Id>>,
}

impl<Id> Default for Listeners<Id> {
    fn default() -> Self {
        Self {
            listeners: SlotMap::with_key(),
            queued: Vec::new(),
        }
    }
}

impl<Id> Listeners<Id> {
    pub(crate) fn register(&mut self, listener: impl Fn(&SyncEvent<Id>) + 'static) -> ListenerKey {
        self.listeners.insert(Rc::new(listener))
    }

    pub(crate) fn unregister(&mut self, key: ListenerKey) {
        self.listeners.remove(key);
    }

    pub(crate) fn queue(&mut self, event: SyncEvent<Id>) {
        self.queued.push(event);
    }

    /// Take the queued events along with the listeners to call, so the caller can release its borrow first.
    pub(crate) fn drain(&mut self) -> (Vec<SyncEvent<Id>>, Vec<Listener<Id>>) {
        let events = std::mem::take(&mut self.queued);
        if events.is_empty() {
            return (events, Vec::new());
        }
        (events, self.listeners.values().cloned().collect())
    }
}
