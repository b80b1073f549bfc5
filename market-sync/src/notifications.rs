use optimist::{Gateway, GatewayError, Resource, ToggleMode, Toggled};
use serde::{Deserialize, Serialize};

use crate::http::{Api, ListEnvelope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    #[serde(default)]
    pub is_read: bool,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// An unread notification weighs one.
pub struct Notifications;

impl Resource for Notifications {
    type Id = u64;
    type Item = Notification;
    const NAME: &'static str = "notifications";
    const TOGGLE_MODE: ToggleMode = ToggleMode::Flag;

    fn id(item: &Notification) -> u64 {
        item.id
    }

    fn weight(item: &Notification) -> u64 {
        u64::from(!item.is_read)
    }

    fn set_weight(item: &mut Notification, weight: u64) {
        item.is_read = weight == 0;
    }
}

pub struct NotificationGateway {
    api: Api,
}

impl NotificationGateway {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

impl Gateway<Notifications> for NotificationGateway {
    type Draft = ();

    fn is_authenticated(&self) -> bool {
        self.api.tokens().is_signed_in()
    }

    async fn list(&self) -> Result<Vec<Notification>, GatewayError> {
        let envelope: ListEnvelope<Notification> = self.api.get("notifications/").await?;
        Ok(envelope.into_items())
    }

    async fn create(&self, _draft: ()) -> Result<Notification, GatewayError> {
        Err(GatewayError::Unsupported("create"))
    }

    async fn remove(&self, _id: &u64) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("remove"))
    }

    // the backend can mark read but never unread
    async fn toggle(&self, _id: &u64) -> Result<Toggled<Notification>, GatewayError> {
        Err(GatewayError::Unsupported("toggle"))
    }

    async fn mark_read(&self, id: &u64) -> Result<(), GatewayError> {
        self.api
            .post_empty(&format!("notifications/{id}/mark-read/"))
            .await
    }

    async fn mark_all_read(&self) -> Result<(), GatewayError> {
        self.api.post_empty("notifications/mark-all-read/").await
    }
}
