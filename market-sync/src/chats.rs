//! Buyer/seller conversations. The backend keeps no read state for chats, so the last-read marker
//! of each chat lives here and a chat's weight is the number of messages newer than it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use optimist::{Gateway, GatewayError, Resource, ToggleMode, Toggled};
use serde::{Deserialize, Serialize};

use crate::http::{Api, ListEnvelope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Filled in client side from the read markers.
    #[serde(default)]
    pub unread_count: u64,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Chat {
    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.iter().max_by_key(|m| m.timestamp)
    }
}

/// Body for `chats/find-or-create/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NewChat {
    pub product: u64,
    pub seller: u64,
    pub buyer: u64,
}

pub struct Chats;

impl Resource for Chats {
    type Id = u64;
    type Item = Chat;
    const NAME: &'static str = "chats";
    const TOGGLE_MODE: ToggleMode = ToggleMode::Flag;

    fn id(item: &Chat) -> u64 {
        item.id
    }

    fn weight(item: &Chat) -> u64 {
        item.unread_count
    }

    fn set_weight(item: &mut Chat, weight: u64) {
        item.unread_count = weight;
    }
}

#[derive(Debug, Default)]
struct Markers {
    read: HashMap<u64, DateTime<Utc>>,
    newest_seen: HashMap<u64, DateTime<Utc>>,
}

/// Per-chat last-read timestamps, shared between the gateway and whoever owns the session.
#[derive(Debug, Clone, Default)]
pub struct ReadMarkers {
    inner: Rc<RefCell<Markers>>,
}

impl ReadMarkers {
    pub fn last_read(&self, chat_id: u64) -> Option<DateTime<Utc>> {
        self.inner.borrow().read.get(&chat_id).copied()
    }

    /// Set `unread_count` from the chat's messages and remember its newest message.
    pub fn annotate(&self, chat: &mut Chat) {
        let mut markers = self.inner.borrow_mut();
        if let Some(newest) = chat.latest_message().map(|m| m.timestamp) {
            markers.newest_seen.insert(chat.id, newest);
        }
        let read = markers.read.get(&chat.id).copied();
        chat.unread_count = chat
            .messages
            .iter()
            .filter(|m| read.is_none_or(|read| m.timestamp > read))
            .count() as u64;
    }

    /// Mark everything seen so far in `chat_id` as read. Returns the new marker, if any message was ever seen.
    pub fn mark_read(&self, chat_id: u64) -> Option<DateTime<Utc>> {
        let mut markers = self.inner.borrow_mut();
        let newest = markers.newest_seen.get(&chat_id).copied()?;
        markers.read.insert(chat_id, newest);
        Some(newest)
    }

    /// The user sent a message at `timestamp`; everything up to it counts as read.
    pub fn note_sent(&self, chat_id: u64, timestamp: DateTime<Utc>) {
        let mut guard = self.inner.borrow_mut();
        let markers = &mut *guard;
        for marker in [&mut markers.newest_seen, &mut markers.read] {
            let at = marker.entry(chat_id).or_insert(timestamp);
            *at = (*at).max(timestamp);
        }
    }

    pub fn mark_all_read(&self) {
        let mut markers = self.inner.borrow_mut();
        let newest = markers.newest_seen.clone();
        markers.read.extend(newest);
    }

    pub fn clear(&self) {
        let mut markers = self.inner.borrow_mut();
        markers.read.clear();
        markers.newest_seen.clear();
    }
}

pub struct ChatGateway {
    api: Api,
    markers: ReadMarkers,
}

impl ChatGateway {
    pub fn new(api: Api, markers: ReadMarkers) -> Self {
        Self { api, markers }
    }

    pub fn markers(&self) -> &ReadMarkers {
        &self.markers
    }

    /// Post a text message to `chat_id`. Returns the server's copy of the message.
    pub async fn send_message(&self, chat_id: u64, text: &str) -> Result<Message, GatewayError> {
        let body = serde_json::json!({
            "chat": chat_id,
            "text": text,
            "message_type": "text",
        });
        let message: Message = self.api.post("messages/", &body).await?;
        self.markers.note_sent(chat_id, message.timestamp);
        Ok(message)
    }
}

impl Gateway<Chats> for ChatGateway {
    type Draft = NewChat;

    fn is_authenticated(&self) -> bool {
        self.api.tokens().is_signed_in()
    }

    async fn list(&self) -> Result<Vec<Chat>, GatewayError> {
        let envelope: ListEnvelope<Chat> = self.api.get("chats/").await?;
        let mut chats = envelope.into_items();
        for chat in &mut chats {
            self.markers.annotate(chat);
        }
        Ok(chats)
    }

    async fn get(&self, id: &u64) -> Result<Chat, GatewayError> {
        let mut chat: Chat = self.api.get(&format!("chats/{id}/")).await?;
        self.markers.annotate(&mut chat);
        Ok(chat)
    }

    /// Finds the existing conversation about the product if there is one.
    async fn create(&self, draft: NewChat) -> Result<Chat, GatewayError> {
        let mut chat: Chat = self.api.post("chats/find-or-create/", &draft).await?;
        self.markers.annotate(&mut chat);
        Ok(chat)
    }

    async fn remove(&self, _id: &u64) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("remove"))
    }

    async fn toggle(&self, _id: &u64) -> Result<Toggled<Chat>, GatewayError> {
        Err(GatewayError::Unsupported("toggle"))
    }

    async fn mark_read(&self, id: &u64) -> Result<(), GatewayError> {
        if self.markers.mark_read(*id).is_none() {
            log::debug!("Chat {id} has no messages to mark read");
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), GatewayError> {
        self.markers.mark_all_read();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: u64, stamps: &[&str]) -> Chat {
        let messages = stamps
            .iter()
            .map(|stamp| Message {
                timestamp: stamp.parse().unwrap(),
                text: Some("hi".to_string()),
                details: serde_json::Map::new(),
            })
            .collect();
        Chat {
            id,
            messages,
            unread_count: 0,
            details: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_unread_counts_follow_marker() {
        let markers = ReadMarkers::default();
        let mut first = chat(1, &["2024-05-01T10:00:00Z", "2024-05-01T10:05:00Z"]);

        markers.annotate(&mut first);
        assert_eq!(first.unread_count, 2);

        assert_eq!(
            markers.mark_read(1),
            Some("2024-05-01T10:05:00Z".parse().unwrap())
        );

        let mut later = chat(
            1,
            &[
                "2024-05-01T10:00:00Z",
                "2024-05-01T10:05:00Z",
                "2024-05-01T11:00:00Z",
            ],
        );
        markers.annotate(&mut later);
        assert_eq!(later.unread_count, 1);
    }

    #[test]
    fn test_mark_read_without_messages() {
        let markers = ReadMarkers::default();
        let mut empty = chat(3, &[]);
        markers.annotate(&mut empty);
        assert_eq!(empty.unread_count, 0);
        assert_eq!(markers.mark_read(3), None);
        assert_eq!(markers.last_read(3), None);
    }

    #[test]
    fn test_mark_all_read_and_clear() {
        let markers = ReadMarkers::default();
        let mut a = chat(1, &["2024-05-01T10:00:00Z"]);
        let mut b = chat(2, &["2024-05-02T10:00:00Z", "2024-05-02T10:01:00Z"]);
        markers.annotate(&mut a);
        markers.annotate(&mut b);

        markers.mark_all_read();
        markers.annotate(&mut a);
        markers.annotate(&mut b);
        assert_eq!(a.unread_count + b.unread_count, 0);

        markers.clear();
        markers.annotate(&mut b);
        assert_eq!(b.unread_count, 2);
    }

    #[test]
    fn test_sent_message_moves_marker_forward() {
        let markers = ReadMarkers::default();
        let mut first = chat(4, &["2024-05-01T10:00:00Z", "2024-05-01T10:05:00Z"]);
        markers.annotate(&mut first);
        assert_eq!(first.unread_count, 2);

        markers.note_sent(4, "2024-05-01T10:02:00Z".parse().unwrap());
        markers.annotate(&mut first);
        assert_eq!(first.unread_count, 1);

        // an older timestamp never moves the marker back
        markers.note_sent(4, "2024-05-01T09:00:00Z".parse().unwrap());
        assert_eq!(
            markers.last_read(4),
            Some("2024-05-01T10:02:00Z".parse().unwrap())
        );

        // a chat never listed still gets a marker
        markers.note_sent(5, "2024-05-03T10:00:00Z".parse().unwrap());
        assert_eq!(markers.mark_read(5), Some("2024-05-03T10:00:00Z".parse().unwrap()));
    }

    #[test]
    fn test_chat_from_backend_json() {
        let chat: Chat = serde_json::from_str(
            r#"{
                "id": 8,
                "product": 31,
                "messages": [
                    {"id": 1, "text": "Is it available?", "timestamp": "2024-05-01T10:00:00.123456Z"},
                    {"id": 2, "text": null, "message_type": "location", "timestamp": "2024-05-01T10:01:00Z"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(chat.unread_count, 0);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.details["product"], 31);
        assert_eq!(chat.latest_message().unwrap().details["message_type"], "location");
    }
}
