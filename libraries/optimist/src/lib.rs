//! This is a library for keeping a client-side copy of a server collection in sync under optimistic mutation.
//! It was created for the marketplace client (wishlist, chats, notifications), so it only covers what those need.
//!
//! Syncing strategy:
//! 1. Each collection lives in a [`store::CollectionStore`], which also keeps an aggregate (e.g. an unread count).
//!    The aggregate is the sum of the items' weights and is adjusted inside every transition, never recomputed later.
//! 2. When the user acts, the [`coordinator::Coordinator`] applies the expected result locally first, then calls the server.
//! 3. When the server answers:
//!   1. If it agrees with the guess, the change is kept.
//!   2. If it disagrees (someone else changed the item first), the server's answer wins.
//!   3. If the call failed, the change is rolled back to the snapshot taken before it.
//! 4. Full refreshes from the server are sequenced, and a refresh that raced with a mutation is thrown away.
//!
//! Everything here is single-threaded: state sits in `RefCell`s and no borrow is ever held across an `.await`.

pub mod coordinator;
pub mod cursor;
pub mod events;
pub mod gateway;
pub mod resource;
pub mod store;

pub use coordinator::{Coordinator, Refresh, Settled};
pub use cursor::ReadCursor;
pub use events::{ListenerKey, SyncEvent};
pub use gateway::{Gateway, GatewayError, Toggled};
pub use resource::{Resource, ToggleMode, ToggleStatus};
pub use store::{CollectionStore, Delta, Snapshot};
