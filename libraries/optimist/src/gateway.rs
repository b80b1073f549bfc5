use crate::resource::{Resource, ToggleStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication required")]
    AuthRequired,
    #[error("network failure: {0}")]
    Network(String),
    #[error("`{0}` is not supported by this gateway")]
    Unsupported(&'static str),
}

/// The server's answer to a toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggled<Item> {
    pub status: ToggleStatus,
    /// The server's copy of the item, when it sends one.
    pub item: Option<Item>,
}

/// Remote side of one collection.
///
/// Gateways hold no collection state and never retry; a failed call is reported as is.
#[allow(async_fn_in_trait)]
pub trait Gateway<R: Resource> {
    /// What `create` needs to make a new item.
    type Draft;

    /// Whether a credential is available. Checked before any optimistic change is made.
    fn is_authenticated(&self) -> bool {
        true
    }

    async fn list(&self) -> Result<Vec<R::Item>, GatewayError>;

    /// Fetch one item. Not every backend has a per-item endpoint.
    async fn get(&self, id: &R::Id) -> Result<R::Item, GatewayError> {
        let _ = id;
        Err(GatewayError::Unsupported("get"))
    }

    async fn create(&self, draft: Self::Draft) -> Result<R::Item, GatewayError>;

    async fn remove(&self, id: &R::Id) -> Result<(), GatewayError>;

    /// Add-if-absent / remove-if-present in one round trip.
    async fn toggle(&self, id: &R::Id) -> Result<Toggled<R::Item>, GatewayError>;

    /// Tell the server one item has been consumed. Nothing to do by default.
    async fn mark_read(&self, id: &R::Id) -> Result<(), GatewayError> {
        let _ = id;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}
