//! Backend contract consumed by the inbox and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{InboxError, Result};
use crate::types::*;

/// Every request the inbox issues. Implemented over HTTP by [`HttpBackend`];
/// tests substitute an in-memory implementation.
#[async_trait]
pub trait InboxBackend: Send + Sync {
    async fn conversations(&self, branch_id: Option<&str>) -> Result<Vec<Conversation>>;

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Returns the stored message when the server echoes it back.
    async fn send_message(&self, message: &OutboundMessage) -> Result<Option<Message>>;

    async fn bot_flows(&self) -> Result<Vec<BotFlow>>;

    async fn track_flow(&self, interaction: &FlowInteraction) -> Result<()>;

    /// Server-side ranking of quick replies for the given inbound text.
    async fn quick_replies(&self, channel_account_id: &str, trigger: &str) -> Result<Vec<Template>>;

    async fn approved_templates(&self) -> Result<Vec<Template>>;

    async fn channel_accounts(&self) -> Result<Vec<ChannelAccount>>;

    async fn group(&self, account_id: &str, group_id: &str) -> Result<GroupInfo>;

    /// Uploads a file and returns its public url.
    async fn upload(&self, file: Upload) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| InboxError::Transport {
                endpoint: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| InboxError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InboxError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T> {
        let response = self.execute(endpoint, request).await?;
        response.json::<T>().await.map_err(|source| InboxError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn fetch_list<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<Vec<T>> {
        let payload = self.fetch::<DataResponse<Vec<T>>>(endpoint, request).await?;
        ensure_success(endpoint, payload.success, payload.error)?;
        Ok(payload.data.unwrap_or_default())
    }
}

fn ensure_success(endpoint: &str, success: bool, error: Option<String>) -> Result<()> {
    if success {
        return Ok(());
    }
    Err(InboxError::Rejected {
        endpoint: endpoint.to_string(),
        message: error.unwrap_or_else(|| "unknown error".to_string()),
    })
}

#[async_trait]
impl InboxBackend for HttpBackend {
    async fn conversations(&self, branch_id: Option<&str>) -> Result<Vec<Conversation>> {
        let mut request = self.client.get(self.url("/conversations"));
        if let Some(branch) = branch_id {
            request = request.query(&[("branchId", branch)]);
        }
        let payload = self
            .fetch::<ConversationsResponse>("/conversations", request)
            .await?;
        ensure_success("/conversations", payload.success, payload.error)?;
        Ok(payload.conversations)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let request = self
            .client
            .get(self.url("/messages"))
            .query(&[("conversationId", conversation_id)]);
        let payload = self.fetch::<MessagesResponse>("/messages", request).await?;
        ensure_success("/messages", payload.success, payload.error)?;
        Ok(payload.messages)
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<Option<Message>> {
        let request = self.client.post(self.url("/messages")).json(message);
        let payload = self
            .fetch::<DataResponse<serde_json::Value>>("/messages", request)
            .await?;
        ensure_success("/messages", payload.success, payload.error)?;
        // the echo is informational; a shape we do not recognise is not a failure
        Ok(payload
            .data
            .and_then(|data| serde_json::from_value::<Message>(data).ok()))
    }

    async fn bot_flows(&self) -> Result<Vec<BotFlow>> {
        let request = self.client.get(self.url("/bot-flows"));
        self.fetch_list("/bot-flows", request).await
    }

    async fn track_flow(&self, interaction: &FlowInteraction) -> Result<()> {
        let request = self
            .client
            .post(self.url("/bot-flows/track"))
            .json(interaction);
        self.execute("/bot-flows/track", request).await?;
        Ok(())
    }

    async fn quick_replies(&self, channel_account_id: &str, trigger: &str) -> Result<Vec<Template>> {
        let request = self
            .client
            .get(self.url("/templates"))
            .query(&[("channelAccountId", channel_account_id), ("trigger", trigger)]);
        self.fetch_list("/templates", request).await
    }

    async fn approved_templates(&self) -> Result<Vec<Template>> {
        let request = self
            .client
            .get(self.url("/templates"))
            .query(&[("status", "APPROVED")]);
        self.fetch_list("/templates", request).await
    }

    async fn channel_accounts(&self) -> Result<Vec<ChannelAccount>> {
        let request = self.client.get(self.url("/channel-accounts"));
        let payload = self
            .fetch::<ChannelAccountsResponse>("/channel-accounts", request)
            .await?;
        Ok(payload.into_accounts())
    }

    async fn group(&self, account_id: &str, group_id: &str) -> Result<GroupInfo> {
        let request = self
            .client
            .get(self.url("/group"))
            .query(&[("accountId", account_id), ("groupId", group_id)]);
        let payload = self.fetch::<GroupResponse>("/group", request).await?;
        ensure_success("/group", payload.success, payload.error)?;
        Ok(payload.group.unwrap_or_default())
    }

    async fn upload(&self, file: Upload) -> Result<String> {
        debug!(file = %file.file_name, bytes = file.bytes.len(), "uploading attachment");
        let part = multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|source| InboxError::Transport {
                endpoint: "/upload".to_string(),
                source,
            })?;
        let form = multipart::Form::new().part("file", part);
        let request = self.client.post(self.url("/upload")).multipart(form);
        let payload = self.fetch::<UploadResponse>("/upload", request).await?;
        ensure_success("/upload", payload.success, payload.error)?;
        payload
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| InboxError::Rejected {
                endpoint: "/upload".to_string(),
                message: "missing url in upload response".to_string(),
            })
    }
}
