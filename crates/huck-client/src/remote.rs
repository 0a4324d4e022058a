use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use huck_types::api::{
    CreateChannelRequest, LookupProfileRequest, SendMessageRequest, SetReactionRequest,
    SetReactionResponse,
};
use huck_types::models::{Channel, MessageRow, MessageWithReactions, Profile};

use crate::error::ClientError;

/// Query and mutation surface of the backing store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Existing profile with this exact username, or a freshly created one.
    async fn lookup_or_create_profile(&self, username: &str) -> Result<Profile, ClientError>;

    /// Point lookup used by enrichment. `Ok(None)` when no such profile exists.
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, ClientError>;

    /// All channels ordered by name.
    async fn list_channels(&self) -> Result<Vec<Channel>, ClientError>;

    async fn create_channel(&self, name: &str, description: &str) -> Result<Channel, ClientError>;

    /// Every message of a channel joined with author and reactions, oldest first.
    async fn fetch_messages(&self, channel_id: Uuid)
    -> Result<Vec<MessageWithReactions>, ClientError>;

    async fn insert_message(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, ClientError>;

    /// Idempotent reaction intent keyed by `(message_id, user_id, emoji_code)`.
    async fn set_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji_code: &str,
        present: bool,
    ) -> Result<SetReactionResponse, ClientError>;
}

/// [`RemoteStore`] over the huck-api REST surface.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn lookup_or_create_profile(&self, username: &str) -> Result<Profile, ClientError> {
        let resp = self
            .client
            .post(self.url("/profiles"))
            .json(&LookupProfileRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        json(resp).await
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, ClientError> {
        let resp = self.client.get(self.url(&format!("/profiles/{id}"))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        json(resp).await.map(Some)
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, ClientError> {
        let resp = self.client.get(self.url("/channels")).send().await?;
        json(resp).await
    }

    async fn create_channel(&self, name: &str, description: &str) -> Result<Channel, ClientError> {
        let resp = self
            .client
            .post(self.url("/channels"))
            .json(&CreateChannelRequest {
                name: name.to_string(),
                description: description.to_string(),
            })
            .send()
            .await?;
        json(resp).await
    }

    async fn fetch_messages(
        &self,
        channel_id: Uuid,
    ) -> Result<Vec<MessageWithReactions>, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/channels/{channel_id}/messages")))
            .send()
            .await?;
        json(resp).await
    }

    async fn insert_message(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, ClientError> {
        let resp = self
            .client
            .post(self.url(&format!("/channels/{channel_id}/messages")))
            .json(&SendMessageRequest {
                user_id,
                content: content.to_string(),
            })
            .send()
            .await?;
        json(resp).await
    }

    async fn set_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji_code: &str,
        present: bool,
    ) -> Result<SetReactionResponse, ClientError> {
        let resp = self
            .client
            .put(self.url(&format!("/messages/{message_id}/reactions")))
            .json(&SetReactionRequest {
                user_id,
                emoji_code: emoji_code.to_string(),
                present,
            })
            .send()
            .await?;
        json(resp).await
    }
}

/// Decode a success body, or turn the error body into [`ClientError::Status`].
async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
