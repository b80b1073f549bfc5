use std::cell::RefCell;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Holds the bearer token. Shared by every gateway, so signing out affects them all at once.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Rc<RefCell<Option<String>>>,
}

impl TokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Rc::new(RefCell::new(token)),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    pub fn set(&self, token: String) {
        *self.token.borrow_mut() = Some(token);
    }

    pub fn clear(&self) {
        self.token.borrow_mut().take();
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.borrow().is_some()
    }

    pub fn user_id(&self) -> Option<String> {
        self.token.borrow().as_deref().and_then(user_id_from_token)
    }
}

/// Read the user id out of a JWT payload (`user_id`, falling back to `id`). The signature is not checked.
pub fn user_id_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .inspect_err(|e| log::warn!("Token payload is not base64: {e}"))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .inspect_err(|e| log::warn!("Token payload is not JSON: {e}"))
        .ok()?;

    let id = claims.get("user_id").or_else(|| claims.get("id"))?;
    match id {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
