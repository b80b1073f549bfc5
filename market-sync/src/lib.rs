//! The marketplace client's synchronized collections (wishlist, notifications, chats) wired to the REST backend.

use std::sync::LazyLock;

use optimist::{Coordinator, GatewayError, Refresh};

pub mod auth;
pub mod chats;
pub mod config;
pub mod http;
pub mod notifications;
pub mod wishlist;

pub use auth::TokenStore;
pub use chats::{Chat, ChatGateway, Chats, Message, NewChat, ReadMarkers};
pub use config::{ClientConfig, ConfigError};
pub use http::Api;
pub use notifications::{Notification, NotificationGateway, Notifications};
pub use wishlist::{Wishlist, WishlistEntry, WishlistGateway};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    if env_logger::try_init().is_ok() {
        log::info!("Logging initialized");
    }
});

pub fn init_logging() {
    LazyLock::force(&LOGGER);
}

/// Everything a signed-in session needs. Single-threaded: keep it on one task.
pub struct Marketplace {
    tokens: TokenStore,
    markers: ReadMarkers,
    pub wishlist: Coordinator<Wishlist, WishlistGateway>,
    pub notifications: Coordinator<Notifications, NotificationGateway>,
    pub chats: Coordinator<Chats, ChatGateway>,
}

impl Marketplace {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        init_logging();

        let tokens = TokenStore::new(config.token.clone());
        let markers = ReadMarkers::default();
        let api = Api::new(config, tokens.clone())?;

        Ok(Self {
            wishlist: Coordinator::new(WishlistGateway::new(api.clone())),
            notifications: Coordinator::new(NotificationGateway::new(api.clone())),
            chats: Coordinator::new(ChatGateway::new(api, markers.clone())),
            tokens,
            markers,
        })
    }

    pub fn is_signed_in(&self) -> bool {
        self.tokens.is_signed_in()
    }

    pub fn user_id(&self) -> Option<String> {
        self.tokens.user_id()
    }

    pub fn sign_in(&self, token: String) {
        self.tokens.set(token);
        log::info!("Signed in as {:?}", self.user_id());
    }

    /// Drop the token and forget everything that belonged to the user.
    pub fn sign_out(&self) {
        self.tokens.clear();
        self.markers.clear();
        self.wishlist.clear();
        self.notifications.clear();
        self.chats.clear();
        log::info!("Signed out");
    }

    /// Refresh all three collections concurrently.
    pub async fn refresh_all(
        &self,
    ) -> (
        Result<Refresh, GatewayError>,
        Result<Refresh, GatewayError>,
        Result<Refresh, GatewayError>,
    ) {
        futures::join!(
            self.wishlist.list(),
            self.notifications.list(),
            self.chats.list()
        )
    }

    /// Unread notifications plus unread chat messages, for the header badge.
    pub fn unread_total(&self) -> u64 {
        self.notifications.aggregate() + self.chats.aggregate()
    }

    /// Open a chat: its messages count as read from now on.
    pub async fn open_chat(&self, chat_id: u64) -> Result<(), GatewayError> {
        self.chats.select(chat_id);
        self.chats.mark_read(chat_id).await
    }

    pub fn close_chat(&self) -> Option<u64> {
        self.chats.deselect()
    }

    /// A message was pushed to `chat_id` over the realtime channel.
    pub fn message_arrived(&self, chat_id: u64) -> bool {
        self.chats.bump(&chat_id, 1)
    }

    /// Send a text message, then reload the chat so it shows the message and counts as read.
    pub async fn send_message(&self, chat_id: u64, text: &str) -> Result<Message, GatewayError> {
        if !self.is_signed_in() {
            log::warn!("Not sending a message to chat {chat_id}: not signed in");
            return Err(GatewayError::AuthRequired);
        }
        let message = self.chats.gateway().send_message(chat_id, text).await?;
        if let Err(e) = self.chats.refresh_item(chat_id).await {
            log::warn!("Sent a message to chat {chat_id} but could not reload it: {e}");
        }
        Ok(message)
    }

    /// Start (or find) the conversation with `seller` about `product`, as the signed-in user.
    pub async fn contact_seller(&self, product: u64, seller: u64) -> Result<Option<u64>, GatewayError> {
        let buyer = self
            .user_id()
            .and_then(|id| id.parse().ok())
            .ok_or(GatewayError::AuthRequired)?;
        self.chats
            .create(NewChat {
                product,
                seller,
                buyer,
            })
            .await
    }
}
