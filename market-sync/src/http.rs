use optimist::{GatewayError, ToggleStatus};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::auth::TokenStore;
use crate::config::{ClientConfig, ConfigError};

/// A list endpoint answers either with a page (`{"results": [...]}`) or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Paginated { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Paginated { results } => results,
            ListEnvelope::Bare(items) => items,
        }
    }
}

/// `{"status": "added", "item": {...}}` or `{"status": "removed", "product_id": 3}`.
#[derive(Debug, Deserialize)]
pub struct ToggleResponse<T> {
    pub status: ToggleStatus,
    pub item: Option<T>,
}

/// Map a response status onto the sync error model.
pub fn status_error(status: StatusCode) -> Option<GatewayError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(GatewayError::AuthRequired)
    } else if !status.is_success() {
        Some(GatewayError::Network(format!("HTTP error: {status}")))
    } else {
        None
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Network(format!("Request error: {e}"))
}

/// Thin JSON client over the marketplace API. Cloning is cheap and shares the token.
#[derive(Debug, Clone)]
pub struct Api {
    client: reqwest::Client,
    config: ClientConfig,
    tokens: TokenStore,
}

impl Api {
    pub fn new(config: ClientConfig, tokens: TokenStore) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .send(self.client.get(self.config.endpoint(path)))
            .await?;
        Self::decode(path, response).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, GatewayError> {
        let response = self
            .send(self.client.post(self.config.endpoint(path)).json(body))
            .await?;
        Self::decode(path, response).await
    }

    /// POST with no body, ignoring whatever comes back.
    pub async fn post_empty(&self, path: &str) -> Result<(), GatewayError> {
        self.send(self.client.post(self.config.endpoint(path)))
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        self.send(self.client.delete(self.config.endpoint(path)))
            .await
            .map(|_| ())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let Some(token) = self.tokens.get() else {
            return Err(GatewayError::AuthRequired);
        };
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        match status_error(response.status()) {
            Some(error) => {
                log::warn!("{} -> {}", response.url().path(), response.status());
                Err(error)
            }
            None => Ok(response),
        }
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, GatewayError> {
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| {
            log::error!("Could not parse response from {path}: {e}. Body: {body}");
            GatewayError::Network(format!("Response parsing error: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: u64,
    }

    #[test]
    fn test_list_envelope_accepts_both_shapes() {
        let paged: ListEnvelope<Row> =
            serde_json::from_str(r#"{"count": 2, "next": null, "results": [{"id": 1}, {"id": 2}]}"#)
                .unwrap();
        assert_eq!(paged.into_items(), vec![Row { id: 1 }, Row { id: 2 }]);

        let bare: ListEnvelope<Row> = serde_json::from_str(r#"[{"id": 3}]"#).unwrap();
        assert_eq!(bare.into_items(), vec![Row { id: 3 }]);

        assert!(serde_json::from_str::<ListEnvelope<Row>>(r#"{"detail": "nope"}"#).is_err());
    }

    #[test]
    fn test_toggle_response_shapes() {
        let added: ToggleResponse<Row> =
            serde_json::from_str(r#"{"status": "added", "item": {"id": 9}}"#).unwrap();
        assert_eq!(added.status, ToggleStatus::Added);
        assert_eq!(added.item, Some(Row { id: 9 }));

        let removed: ToggleResponse<Row> =
            serde_json::from_str(r#"{"status": "removed", "product_id": 9}"#).unwrap();
        assert_eq!(removed.status, ToggleStatus::Removed);
        assert_eq!(removed.item, None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(StatusCode::OK), None);
        assert_eq!(status_error(StatusCode::NO_CONTENT), None);
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            Some(GatewayError::AuthRequired)
        );
        assert_eq!(
            status_error(StatusCode::FORBIDDEN),
            Some(GatewayError::AuthRequired)
        );
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND),
            Some(GatewayError::Network(_))
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR),
            Some(GatewayError::Network(_))
        ));
    }
}
