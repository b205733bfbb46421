//! Typed wrapper over the Murmur REST API.
//!
//! Every method attaches the caller's bearer token and decodes non-success
//! responses into [`ClientError::Api`] using the server's `{"error": ...}`
//! body.

use serde::Deserialize;

use murmur_shared::protocol::{
    ConversationSummary, CreateConversationRequest, FeedMessage, SendMessageRequest,
    SubscriptionDescriptor, UpdateGroupRequest,
};
use murmur_shared::{ConversationId, MessageId, MessageType, UserId};

use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct ChatApi {
    base: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReconcileResponse {
    pub marked: usize,
}

impl ChatApi {
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.get_json("/conversations").await
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<ConversationSummary> {
        self.get_json(&format!("/conversations/{id}")).await
    }

    pub async fn create_direct(&self, peer: UserId) -> Result<ConversationSummary> {
        self.post_json(
            "/conversations",
            &CreateConversationRequest {
                is_group: false,
                participants: vec![peer],
                group_name: None,
                group_image: None,
            },
        )
        .await
    }

    pub async fn create_group(
        &self,
        name: &str,
        image: Option<&str>,
        members: &[UserId],
    ) -> Result<ConversationSummary> {
        self.post_json(
            "/conversations",
            &CreateConversationRequest {
                is_group: true,
                participants: members.to_vec(),
                group_name: Some(name.to_string()),
                group_image: image.map(str::to_string),
            },
        )
        .await
    }

    pub async fn update_group(
        &self,
        id: ConversationId,
        req: &UpdateGroupRequest,
    ) -> Result<ConversationSummary> {
        let response = self
            .http
            .patch(self.url(&format!("/conversations/{id}")))
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        self.delete(&format!("/conversations/{id}")).await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn fetch_feed(
        &self,
        conversation: ConversationId,
        limit: u32,
    ) -> Result<Vec<FeedMessage>> {
        self.get_json(&format!("/conversations/{conversation}/messages?limit={limit}"))
            .await
    }

    pub async fn send_message(
        &self,
        conversation: ConversationId,
        content: &str,
        message_type: MessageType,
        reply_to: Option<MessageId>,
    ) -> Result<FeedMessage> {
        self.post_json(
            &format!("/conversations/{conversation}/messages"),
            &SendMessageRequest {
                content: content.to_string(),
                message_type,
                reply_to,
            },
        )
        .await
    }

    pub async fn unsend_message(&self, id: MessageId) -> Result<()> {
        self.delete(&format!("/messages/{id}")).await
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    pub async fn mark_delivered(&self, conversation: ConversationId) -> Result<usize> {
        let response: ReconcileResponse = self
            .post_json(
                &format!("/conversations/{conversation}/delivered"),
                &serde_json::json!({}),
            )
            .await?;
        Ok(response.marked)
    }

    pub async fn mark_seen(&self, conversation: ConversationId) -> Result<usize> {
        let response: ReconcileResponse = self
            .post_json(
                &format!("/conversations/{conversation}/seen"),
                &serde_json::json!({}),
            )
            .await?;
        Ok(response.marked)
    }

    // ------------------------------------------------------------------
    // Push subscriptions
    // ------------------------------------------------------------------

    pub async fn push_subscribe(&self, descriptor: &SubscriptionDescriptor) -> Result<()> {
        let _: serde_json::Value = self.post_json("/push/subscribe", descriptor).await?;
        Ok(())
    }

    pub async fn push_unsubscribe(&self, endpoint: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(
                "/push/unsubscribe",
                &serde_json::json!({ "endpoint": endpoint }),
            )
            .await?;
        Ok(())
    }
}
