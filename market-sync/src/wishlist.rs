//! Saved products. An entry is keyed by the product it points at, and each one counts once.

use optimist::{Gateway, GatewayError, Resource, ToggleMode, Toggled};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::{Api, ListEnvelope, ToggleResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    /// The server's row id. Absent on the placeholder shown while a toggle is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub product_id: u64,
    /// Product title, price, image and whatever else the backend sends along.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl WishlistEntry {
    pub fn placeholder(product_id: u64) -> Self {
        Self {
            id: None,
            product_id,
            details: serde_json::Map::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }

    pub fn title(&self) -> Option<&str> {
        self.details.get("product_title").and_then(|v| v.as_str())
    }
}

pub struct Wishlist;

impl Resource for Wishlist {
    type Id = u64;
    type Item = WishlistEntry;
    const NAME: &'static str = "wishlist";
    const TOGGLE_MODE: ToggleMode = ToggleMode::Membership;

    fn id(item: &WishlistEntry) -> u64 {
        item.product_id
    }

    fn weight(_item: &WishlistEntry) -> u64 {
        1
    }

    // every entry counts once
    fn set_weight(_item: &mut WishlistEntry, _weight: u64) {}

    fn placeholder(product_id: &u64) -> Option<WishlistEntry> {
        Some(WishlistEntry::placeholder(*product_id))
    }
}

pub struct WishlistGateway {
    api: Api,
}

impl WishlistGateway {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

impl Gateway<Wishlist> for WishlistGateway {
    /// The product to save.
    type Draft = u64;

    fn is_authenticated(&self) -> bool {
        self.api.tokens().is_signed_in()
    }

    async fn list(&self) -> Result<Vec<WishlistEntry>, GatewayError> {
        let envelope: ListEnvelope<WishlistEntry> = self.api.get("wishlist/").await?;
        Ok(envelope.into_items())
    }

    async fn create(&self, product_id: u64) -> Result<WishlistEntry, GatewayError> {
        self.api
            .post("wishlist/", &json!({ "product_id": product_id }))
            .await
    }

    async fn remove(&self, product_id: &u64) -> Result<(), GatewayError> {
        self.api
            .delete(&format!("wishlist/remove/{product_id}/"))
            .await
    }

    async fn toggle(&self, product_id: &u64) -> Result<Toggled<WishlistEntry>, GatewayError> {
        let response: ToggleResponse<WishlistEntry> = self
            .api
            .post("wishlist/toggle/", &json!({ "product_id": product_id }))
            .await?;
        Ok(Toggled {
            status: response.status,
            item: response.item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_keeps_extra_fields() {
        let entry: WishlistEntry = serde_json::from_str(
            r#"{"id": 4, "product_id": 12, "product_title": "Desk lamp", "product_price": "19.00"}"#,
        )
        .unwrap();

        assert_eq!(Wishlist::id(&entry), 12);
        assert_eq!(entry.title(), Some("Desk lamp"));
        assert!(!entry.is_placeholder());

        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["product_price"], "19.00");
    }

    #[test]
    fn test_placeholder() {
        let entry = Wishlist::placeholder(&3).unwrap();
        assert!(entry.is_placeholder());
        assert_eq!(Wishlist::weight(&entry), 1);
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({ "product_id": 3 })
        );
    }
}
