//! # Coordinator
//! Owns one collection and is the only thing allowed to change it.
//! Mutations are applied locally, sent to the gateway, then committed, reconciled or rolled back.
//!
//! Mutations on the same id are serialized: a second toggle of an item waits for the first one to
//! settle, then snapshots whatever the first left behind. Mutations on different ids run freely.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use chokepoint::ChokePoint;

use crate::cursor::ReadCursor;
use crate::events::{ListenerKey, Listeners, SyncEvent};
use crate::gateway::{Gateway, GatewayError, Toggled};
use crate::resource::{Resource, ToggleMode, ToggleStatus};
use crate::store::{CollectionStore, Delta, Snapshot};

/// How a toggle ended, when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The server agreed with the optimistic guess.
    Committed(ToggleStatus),
    /// The server disagreed; its status was applied.
    Reconciled {
        guessed: ToggleStatus,
        actual: ToggleStatus,
    },
    /// The coordinator was closed before the server answered. Nothing was applied.
    Dropped,
}

/// How a full refresh ended, when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Applied { items: usize, aggregate: u64 },
    /// Local state moved on while the refresh was in flight, so it was ignored.
    Stale,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Toggle(ToggleStatus),
    Remove,
    MarkRead,
}

impl Intent {
    fn describe(self) -> String {
        match self {
            Intent::Toggle(guess) => format!("toggle (guessed {guess:?})"),
            Intent::Remove => "removal".to_string(),
            Intent::MarkRead => "mark_read".to_string(),
        }
    }
}

struct PendingMutation<R: Resource> {
    intent: Intent,
    original: Snapshot<R::Item>,
    /// `bulk_commits` when the mutation began.
    bulk_commits: u64,
}

pub struct Coordinator<R: Resource, G: Gateway<R>> {
    gateway: G,
    // never hold one of these borrows across an .await
    store: RefCell<CollectionStore<R>>,
    cursor: RefCell<ReadCursor<R::Id>>,
    pending: RefCell<HashMap<R::Id, PendingMutation<R>>>,
    bulk_pending: Cell<usize>,
    /// Number of `mark_all_read` calls the server has confirmed.
    bulk_commits: Cell<u64>,
    gates: ChokePoint<R::Id>,
    /// Bumped whenever a local change settles. A refresh dispatched under an older epoch is stale.
    epoch: Cell<u64>,
    next_list_seq: Cell<u64>,
    applied_list_seq: Cell<Option<u64>>,
    alive: Cell<bool>,
    listeners: RefCell<Listeners<R::Id>>,
}

impl<R: Resource, G: Gateway<R>> Coordinator<R, G> {
    pub fn new(gateway: G) -> Self {
        Self::with_store(gateway, CollectionStore::new())
    }

    pub fn with_store(gateway: G, store: CollectionStore<R>) -> Self {
        Self {
            gateway,
            store: RefCell::new(store),
            cursor: RefCell::new(ReadCursor::new()),
            pending: RefCell::new(HashMap::new()),
            bulk_pending: Cell::new(0),
            bulk_commits: Cell::new(0),
            gates: ChokePoint::new(),
            epoch: Cell::new(0),
            next_list_seq: Cell::new(0),
            applied_list_seq: Cell::new(None),
            alive: Cell::new(true),
            listeners: RefCell::new(Listeners::default()),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    // =======
    // reads
    // =======

    pub fn get_all(&self) -> Vec<R::Item> {
        self.store.borrow().get_all()
    }

    pub fn get(&self, id: &R::Id) -> Option<R::Item> {
        self.store.borrow().get(id).cloned()
    }

    pub fn aggregate(&self) -> u64 {
        self.store.borrow().aggregate()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }

    pub fn active_id(&self) -> Option<R::Id> {
        self.cursor.borrow().active().cloned()
    }

    pub fn is_pending(&self, id: &R::Id) -> bool {
        self.pending.borrow().contains_key(id)
    }

    /// A copy of the store, for inspection.
    pub fn snapshot_store(&self) -> CollectionStore<R> {
        self.store.borrow().clone()
    }

    // =======
    // listeners and liveness
    // =======

    pub fn register_listener(&self, listener: impl Fn(&SyncEvent<R::Id>) + 'static) -> ListenerKey {
        self.listeners.borrow_mut().register(listener)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().unregister(key)
    }

    /// The view using this coordinator is gone. Answers that arrive from now on are discarded.
    pub fn close(&self) {
        self.alive.set(false);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    // =======
    // local-only transitions
    // =======

    /// Make `id` the active item, consuming its weight. Returns the weight consumed.
    pub fn select(&self, id: R::Id) -> u64 {
        let mut store = self.store.borrow_mut();
        self.cursor.borrow_mut().select(&mut *store, id)
    }

    pub fn deselect(&self) -> Option<R::Id> {
        self.cursor.borrow_mut().deselect()
    }

    /// Consume every item's weight locally.
    pub fn reset_all(&self) {
        let mut store = self.store.borrow_mut();
        self.cursor.borrow().reset_all(&mut *store);
        self.advance_epoch();
    }

    /// New activity on an item, e.g. a message pushed to a chat. Ignored for the active item,
    /// which the user is already looking at. Returns whether the weight changed.
    pub fn bump(&self, id: &R::Id, by: u64) -> bool {
        if by == 0 || self.cursor.borrow().is_active(id) {
            return false;
        }
        let mut store = self.store.borrow_mut();
        let Some(weight) = store.weight(id) else {
            log::debug!("{}: ignoring activity on unknown item {id:?}", R::NAME);
            return false;
        };
        let changed = store.apply_delta(id, Delta::FieldChanged(weight + by));
        self.advance_epoch();
        changed
    }

    /// Forget everything, e.g. on sign-out.
    pub fn clear(&self) {
        self.store.borrow_mut().replace_all(std::iter::empty());
        self.cursor.borrow_mut().deselect();
        self.advance_epoch();
    }

    // =======
    // server round trips
    // =======

    /// Fetch the whole collection and replace the local copy, unless local state moved on meanwhile.
    pub async fn list(&self) -> Result<Refresh, GatewayError> {
        self.ensure_authenticated("list")?;

        let seq = self.next_list_seq.get();
        self.next_list_seq.set(seq + 1);
        let dispatched_at = self.epoch.get();

        let result = self.gateway.list().await;

        let _flusher = FlushLater::new(self);
        if !self.alive.get() {
            self.dropped("list");
            return Ok(Refresh::Dropped);
        }
        let items = result.inspect_err(|e| log::error!("{}: list failed: {e}", R::NAME))?;

        let superseded = self.applied_list_seq.get().is_some_and(|applied| applied > seq);
        let raced = !self.pending.borrow().is_empty()
            || self.bulk_pending.get() > 0
            || self.epoch.get() != dispatched_at;
        if superseded || raced {
            log::info!(
                "{}: discarding refresh #{seq} (superseded: {superseded}, raced with a mutation: {raced})",
                R::NAME
            );
            self.emit(SyncEvent::StaleSnapshot { seq });
            return Ok(Refresh::Stale);
        }

        let (len, aggregate) = {
            let mut store = self.store.borrow_mut();
            store.replace_all(items);
            self.cursor.borrow().reconsume(&mut *store);
            (store.len(), store.aggregate())
        };
        self.applied_list_seq.set(Some(seq));

        log::info!("{}: refreshed {len} items, aggregate {aggregate}", R::NAME);
        self.emit(SyncEvent::Refreshed {
            items: len,
            aggregate,
        });
        Ok(Refresh::Applied {
            items: len,
            aggregate,
        })
    }

    /// Flip `id` optimistically, then reconcile with the server's answer.
    pub async fn toggle(&self, id: R::Id) -> Result<Settled, GatewayError> {
        self.ensure_authenticated("toggle")?;

        let _passage = self.gates.enter(id.clone()).await;
        if !self.alive.get() {
            let _flusher = FlushLater::new(self);
            self.dropped("toggle");
            return Ok(Settled::Dropped);
        }

        let guessed = {
            let mut store = self.store.borrow_mut();
            let original = store.snapshot(&id);
            let guessed = Self::apply_toggle_guess(&mut store, &id, &original);
            self.begin(id.clone(), Intent::Toggle(guessed), original);
            guessed
        };
        log::debug!("{}: toggling {id:?}, guessing {guessed:?}", R::NAME);

        let result = self.gateway.toggle(&id).await;

        let _flusher = FlushLater::new(self);
        let Some(pending) = self.finish(&id) else {
            log::error!("{}: toggle of {id:?} lost its pending mutation", R::NAME);
            return Ok(Settled::Dropped);
        };
        if !self.alive.get() {
            self.dropped("toggle");
            return Ok(Settled::Dropped);
        }

        match result {
            Ok(Toggled { status, item }) if status == guessed => {
                let keeps_item =
                    R::TOGGLE_MODE == ToggleMode::Flag || status == ToggleStatus::Added;
                if let Some(item) = item.filter(|_| keeps_item) {
                    // the server's copy replaces the placeholder
                    self.store
                        .borrow_mut()
                        .apply_delta(&id, Delta::Added(item));
                }
                self.emit(SyncEvent::Committed { id, status });
                Ok(Settled::Committed(status))
            }
            Ok(Toggled { status, item }) => {
                log::warn!(
                    "{}: server reported {status:?} for {id:?} but we guessed {guessed:?}; using the server's answer",
                    R::NAME
                );
                Self::converge(
                    &mut self.store.borrow_mut(),
                    &id,
                    status,
                    item,
                    &pending.original,
                );
                self.emit(SyncEvent::Conflict {
                    id,
                    guessed,
                    actual: status,
                });
                Ok(Settled::Reconciled {
                    guessed,
                    actual: status,
                })
            }
            Err(error) => Err(self.roll_back(id, pending, error)),
        }
    }

    /// Ask the server for a new item and add it once it exists. Nothing is shown before that.
    /// Returns the new item's id, or `None` if the answer arrived after `close`.
    pub async fn create(&self, draft: G::Draft) -> Result<Option<R::Id>, GatewayError> {
        self.ensure_authenticated("create")?;

        let result = self.gateway.create(draft).await;

        let _flusher = FlushLater::new(self);
        if !self.alive.get() {
            self.dropped("create");
            return Ok(None);
        }
        let item = result.inspect_err(|e| log::error!("{}: create failed: {e}", R::NAME))?;

        let id = R::id(&item);
        self.store
            .borrow_mut()
            .apply_delta(&id, Delta::Added(item));
        self.advance_epoch();
        self.emit(SyncEvent::Committed {
            id: id.clone(),
            status: ToggleStatus::Added,
        });
        Ok(Some(id))
    }

    /// Replace one item with the server's current copy. Returns its weight afterwards,
    /// or `None` if the answer arrived after `close`.
    pub async fn refresh_item(&self, id: R::Id) -> Result<Option<u64>, GatewayError> {
        self.ensure_authenticated("refresh_item")?;

        let _passage = self.gates.enter(id.clone()).await;
        let result = self.gateway.get(&id).await;

        let _flusher = FlushLater::new(self);
        if !self.alive.get() {
            self.dropped("refresh_item");
            return Ok(None);
        }
        let item =
            result.inspect_err(|e| log::error!("{}: fetching {id:?} failed: {e}", R::NAME))?;

        let weight = {
            let mut store = self.store.borrow_mut();
            store.apply_delta(&id, Delta::Added(item));
            self.cursor.borrow().reconsume(&mut *store);
            store.weight(&id).unwrap_or(0)
        };
        self.advance_epoch();
        self.emit(SyncEvent::ItemRefreshed { id, weight });
        Ok(Some(weight))
    }

    /// Remove `id` optimistically; put it back if the server call fails.
    pub async fn remove(&self, id: R::Id) -> Result<(), GatewayError> {
        self.ensure_authenticated("remove")?;

        let _passage = self.gates.enter(id.clone()).await;
        if !self.alive.get() {
            let _flusher = FlushLater::new(self);
            self.dropped("remove");
            return Ok(());
        }

        {
            let mut store = self.store.borrow_mut();
            let original = store.snapshot(&id);
            store.apply_delta(&id, Delta::Removed);
            self.begin(id.clone(), Intent::Remove, original);
        }

        let result = self.gateway.remove(&id).await;

        let _flusher = FlushLater::new(self);
        let Some(pending) = self.finish(&id) else {
            log::error!("{}: removal of {id:?} lost its pending mutation", R::NAME);
            return Ok(());
        };
        if !self.alive.get() {
            self.dropped("remove");
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.emit(SyncEvent::Committed {
                    id,
                    status: ToggleStatus::Removed,
                });
                Ok(())
            }
            Err(error) => Err(self.roll_back(id, pending, error)),
        }
    }

    /// Consume one item's weight optimistically and acknowledge it to the server.
    pub async fn mark_read(&self, id: R::Id) -> Result<(), GatewayError> {
        self.ensure_authenticated("mark_read")?;

        let _passage = self.gates.enter(id.clone()).await;
        if !self.alive.get() {
            let _flusher = FlushLater::new(self);
            self.dropped("mark_read");
            return Ok(());
        }

        {
            let mut store = self.store.borrow_mut();
            let original = store.snapshot(&id);
            store.apply_delta(&id, Delta::FieldChanged(0));
            self.begin(id.clone(), Intent::MarkRead, original);
        }

        let result = self.gateway.mark_read(&id).await;

        let _flusher = FlushLater::new(self);
        let Some(pending) = self.finish(&id) else {
            log::error!("{}: mark_read of {id:?} lost its pending mutation", R::NAME);
            return Ok(());
        };
        if !self.alive.get() {
            self.dropped("mark_read");
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.emit(SyncEvent::Committed {
                    id,
                    status: ToggleStatus::Removed,
                });
                Ok(())
            }
            Err(error) => Err(self.roll_back(id, pending, error)),
        }
    }

    /// Consume every weight optimistically and acknowledge it to the server.
    /// On failure each item still present gets its old weight back.
    pub async fn mark_all_read(&self) -> Result<(), GatewayError> {
        self.ensure_authenticated("mark_all_read")?;

        let originals: Vec<(R::Id, u64)> = {
            let mut store = self.store.borrow_mut();
            let originals = store
                .iter()
                .map(|item| (R::id(item), R::weight(item)))
                .filter(|(_, weight)| *weight > 0)
                .collect();
            self.cursor.borrow().reset_all(&mut *store);
            originals
        };
        self.bulk_pending.set(self.bulk_pending.get() + 1);

        let result = self.gateway.mark_all_read().await;

        let _flusher = FlushLater::new(self);
        self.bulk_pending.set(self.bulk_pending.get() - 1);
        self.advance_epoch();
        if !self.alive.get() {
            self.dropped("mark_all_read");
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.bulk_commits.set(self.bulk_commits.get() + 1);
                Ok(())
            }
            Err(error) => {
                log::error!(
                    "{}: mark_all_read failed, restoring {} unread items: {error}",
                    R::NAME,
                    originals.len()
                );
                {
                    let mut store = self.store.borrow_mut();
                    for (id, weight) in originals {
                        // leave items alone that something else touched meanwhile
                        if store.weight(&id) == Some(0) {
                            store.apply_delta(&id, Delta::FieldChanged(weight));
                        }
                    }
                }
                self.emit(SyncEvent::RolledBack {
                    id: None,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    // =======
    // internals
    // =======

    fn ensure_authenticated(&self, operation: &'static str) -> Result<(), GatewayError> {
        if self.gateway.is_authenticated() {
            Ok(())
        } else {
            log::warn!("{}: `{operation}` needs a signed-in user", R::NAME);
            Err(GatewayError::AuthRequired)
        }
    }

    fn apply_toggle_guess(
        store: &mut CollectionStore<R>,
        id: &R::Id,
        original: &Snapshot<R::Item>,
    ) -> ToggleStatus {
        match (R::TOGGLE_MODE, original.item()) {
            (ToggleMode::Membership, None) => {
                if let Some(placeholder) = R::placeholder(id) {
                    store.apply_delta(id, Delta::Added(placeholder));
                }
                ToggleStatus::Added
            }
            (ToggleMode::Membership, Some(_)) => {
                store.apply_delta(id, Delta::Removed);
                ToggleStatus::Removed
            }
            (ToggleMode::Flag, Some(item)) if R::weight(item) > 0 => {
                store.apply_delta(id, Delta::FieldChanged(0));
                ToggleStatus::Removed
            }
            (ToggleMode::Flag, _) => {
                store.apply_delta(id, Delta::FieldChanged(1));
                ToggleStatus::Added
            }
        }
    }

    /// Bring `id` to the state the server reported, replacing a wrong guess.
    fn converge(
        store: &mut CollectionStore<R>,
        id: &R::Id,
        actual: ToggleStatus,
        item: Option<R::Item>,
        original: &Snapshot<R::Item>,
    ) {
        if let Some(item) = item {
            match (R::TOGGLE_MODE, actual) {
                (ToggleMode::Membership, ToggleStatus::Removed) => {
                    store.apply_delta(id, Delta::Removed);
                }
                _ => {
                    store.apply_delta(id, Delta::Added(item));
                }
            }
            return;
        }

        match (R::TOGGLE_MODE, actual) {
            (ToggleMode::Membership, ToggleStatus::Removed) => {
                store.apply_delta(id, Delta::Removed);
            }
            (ToggleMode::Membership, ToggleStatus::Added) => {
                let restored = match original {
                    Snapshot::Present { .. } => original.clone(),
                    Snapshot::Absent => match R::placeholder(id) {
                        Some(item) => Snapshot::Present {
                            index: store.len(),
                            item,
                        },
                        None => {
                            log::warn!(
                                "{}: server says {id:?} was added but sent no copy of it; it will appear on the next refresh",
                                R::NAME
                            );
                            return;
                        }
                    },
                };
                store.restore(id, restored);
            }
            (ToggleMode::Flag, ToggleStatus::Removed) => {
                store.apply_delta(id, Delta::FieldChanged(0));
            }
            (ToggleMode::Flag, ToggleStatus::Added) => {
                let weight = original.item().map(R::weight).filter(|w| *w > 0).unwrap_or(1);
                store.apply_delta(id, Delta::FieldChanged(weight));
            }
        }
    }

    fn begin(&self, id: R::Id, intent: Intent, original: Snapshot<R::Item>) {
        let bulk_commits = self.bulk_commits.get();
        let previous = self.pending.borrow_mut().insert(
            id,
            PendingMutation {
                intent,
                original,
                bulk_commits,
            },
        );
        debug_assert!(previous.is_none(), "same-id mutations must be serialized");
    }

    fn finish(&self, id: &R::Id) -> Option<PendingMutation<R>> {
        let pending = self.pending.borrow_mut().remove(id);
        self.advance_epoch();
        pending
    }

    fn roll_back(&self, id: R::Id, pending: PendingMutation<R>, error: GatewayError) -> GatewayError {
        log::error!(
            "{}: {} of {id:?} failed, rolling back: {error}",
            R::NAME,
            pending.intent.describe()
        );
        let mut original = pending.original;
        if self.bulk_commits.get() != pending.bulk_commits {
            // a confirmed mark_all_read consumed the item after the snapshot was taken
            if let Snapshot::Present { item, .. } = &mut original {
                R::set_weight(item, 0);
            }
        }
        self.store.borrow_mut().restore(&id, original);
        self.emit(SyncEvent::RolledBack {
            id: Some(id),
            error: error.clone(),
        });
        error
    }

    fn advance_epoch(&self) {
        self.epoch.set(self.epoch.get() + 1);
    }

    fn dropped(&self, operation: &'static str) {
        log::debug!("{}: dropping `{operation}` completion, coordinator closed", R::NAME);
        self.emit(SyncEvent::Dropped { operation });
    }

    fn emit(&self, event: SyncEvent<R::Id>) {
        self.listeners.borrow_mut().queue(event);
    }

    /// Call listeners with everything queued, without holding any borrow while they run.
    fn flush_events(&self) {
        // listeners may call straight back into the coordinator
        let (events, listeners) = self.listeners.borrow_mut().drain();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

struct FlushLater<'a, R: Resource, G: Gateway<R>> {
    coordinator: &'a Coordinator<R, G>,
}

impl<'a, R: Resource, G: Gateway<R>> FlushLater<'a, R, G> {
    fn new(coordinator: &'a Coordinator<R, G>) -> Self {
        Self { coordinator }
    }
}

impl<R: Resource, G: Gateway<R>> Drop for FlushLater<'_, R, G> {
    fn drop(&mut self) {
        self.coordinator.flush_events();
    }
}
