use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Suffix WhatsApp uses for group chat identifiers.
pub const GROUP_MARKER: &str = "@g.us";
/// Longest E.164 number; anything longer is a group identifier.
pub const MAX_PHONE_DIGITS: usize = 15;

const LEAD_STATUSES: [&str; 6] = ["new", "contacted", "qualified", "proposal", "won", "lost"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    #[default]
    #[serde(alias = "active")]
    Active,
    #[serde(alias = "resolved")]
    Resolved,
    #[serde(alias = "pending")]
    Pending,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[serde(alias = "incoming")]
    Incoming,
    #[serde(alias = "outgoing")]
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    #[serde(alias = "sent")]
    Sent,
    #[serde(alias = "delivered")]
    Delivered,
    #[serde(alias = "read")]
    Read,
    #[serde(alias = "failed")]
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    #[serde(alias = "text")]
    Text,
    #[serde(alias = "image")]
    Image,
    #[serde(alias = "audio")]
    Audio,
    #[serde(alias = "video")]
    Video,
    #[serde(alias = "document")]
    Document,
    #[serde(alias = "location")]
    Location,
    /// Stickers, contacts, reactions and anything newer.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn label(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            MessageType::Document => "document",
            MessageType::Location => "location",
            MessageType::Unknown => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRef {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "tag_set")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub branch: Option<BranchRef>,
    #[serde(default, alias = "groupId")]
    pub external_id: Option<String>,
}

impl Contact {
    pub fn phone_digits(&self) -> String {
        digits_only(&self.phone)
    }

    /// Groups carry the `@g.us` marker or an id longer than any phone number.
    pub fn is_group(&self) -> bool {
        if self.phone.contains(GROUP_MARKER)
            || self
                .external_id
                .as_deref()
                .is_some_and(|id| id.contains(GROUP_MARKER))
        {
            return true;
        }
        self.phone_digits().len() > MAX_PHONE_DIGITS
    }

    /// Identifier the group endpoint expects for this contact.
    pub fn group_id(&self) -> Option<String> {
        if !self.is_group() {
            return None;
        }
        if let Some(external) = self.external_id.as_deref().map(str::trim) {
            if !external.is_empty() {
                return Some(external.to_string());
            }
        }
        let phone = self.phone.trim();
        if phone.contains(GROUP_MARKER) {
            Some(phone.to_string())
        } else {
            Some(format!("{}{GROUP_MARKER}", digits_only(phone)))
        }
    }

    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            self.phone.trim()
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Whatsapp,
    WhatsappGroup,
}

/// Presentation hints derived on refresh; never read back from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayHints {
    pub platform: Platform,
    pub lead_status: Option<String>,
}

impl DisplayHints {
    pub fn for_contact(contact: &Contact) -> Self {
        let platform = if contact.is_group() {
            Platform::WhatsappGroup
        } else {
            Platform::Whatsapp
        };
        let lead_status = contact
            .tags
            .iter()
            .map(|tag| tag.to_ascii_lowercase())
            .find(|tag| LEAD_STATUSES.contains(&tag.as_str()));
        Self {
            platform,
            lead_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub contact: Contact,
    #[serde(default)]
    pub status: ConversationStatus,
    /// Empty conversations report no activity; they sort last.
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_message_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_read: bool,
    #[serde(default, alias = "assignedAgent")]
    pub assigned_to: Option<AgentRef>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub channel_account_id: Option<String>,
    #[serde(skip_deserializing)]
    pub display: DisplayHints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub sender: Option<SenderRef>,
    #[serde(default, alias = "replyToId")]
    pub quoted_message_id: Option<String>,
    #[serde(default)]
    pub quoted_message: Option<MessagePreview>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub channel_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_inbound_text(&self) -> bool {
        self.direction == Direction::Incoming
            && self.kind == MessageType::Text
            && !self.content.trim().is_empty()
    }

    pub fn channel_account(&self) -> Option<&str> {
        self.channel_account_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            id: self.id.clone(),
            content: self.content.clone(),
            kind: self.kind,
            direction: Some(self.direction),
            created_at: Some(self.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotFlow {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trigger: String,
    #[serde(default = "default_true", alias = "active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default", alias = "body")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(alias = "phone")]
    pub id: String,
    #[serde(default, alias = "admin")]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    #[serde(default)]
    pub participants_count: usize,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

impl ChannelAccount {
    pub fn is_connected(&self) -> bool {
        self.status.eq_ignore_ascii_case("CONNECTED")
    }
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub content: String,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowAction {
    Accepted,
    Dismissed,
}

/// Body of `POST /bot-flows/track`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInteraction {
    pub flow_id: String,
    pub contact_id: String,
    pub action: FlowAction,
    pub step_index: u32,
    pub metadata: Value,
}

/// A file ready for `POST /upload`.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataResponse<T> {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub group: Option<GroupInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `/channel-accounts` has shipped both as a bare array and wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChannelAccountsResponse {
    List(Vec<ChannelAccount>),
    Data { data: Vec<ChannelAccount> },
    Accounts { accounts: Vec<ChannelAccount> },
}

impl ChannelAccountsResponse {
    pub fn into_accounts(self) -> Vec<ChannelAccount> {
        match self {
            ChannelAccountsResponse::List(accounts)
            | ChannelAccountsResponse::Data { data: accounts }
            | ChannelAccountsResponse::Accounts { accounts } => accounts,
        }
    }
}

pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn default_true() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Tags arrive as a list, a comma separated string, or null.
fn tag_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact(value: Value) -> Contact {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn tags_normalize_from_list_string_and_null() {
        let listed = contact(json!({ "tags": ["vip", " lead ", ""] }));
        let joined = contact(json!({ "tags": "vip, lead" }));
        let missing = contact(json!({ "tags": null }));
        assert_eq!(listed.tags, joined.tags);
        assert!(listed.tags.contains("lead"));
        assert!(missing.tags.is_empty());
    }

    #[test]
    fn group_shape_detection() {
        assert!(contact(json!({ "phone": "120363025@g.us" })).is_group());
        assert!(contact(json!({ "phone": "1203630251234567890" })).is_group());
        assert!(!contact(json!({ "phone": "+20 123 456 7890" })).is_group());
        let group = contact(json!({ "phone": "1203630251234567890" }));
        assert_eq!(group.group_id().as_deref(), Some("1203630251234567890@g.us"));
    }

    #[test]
    fn message_tolerates_nulls_and_lowercase_enums() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "direction": "incoming",
            "type": "text",
            "content": null,
            "metadata": null,
            "createdAt": "2026-01-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(message.direction, Direction::Incoming);
        assert!(message.content.is_empty());
        assert!(!message.is_inbound_text());
    }

    #[test]
    fn unsupported_message_type_keeps_thread_decodable() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "messages": [
                { "id": "m1", "direction": "INCOMING", "type": "STICKER", "content": "", "createdAt": "2026-01-01T10:00:00Z" },
                { "id": "m2", "direction": "INCOMING", "type": "TEXT", "content": "hi", "createdAt": "2026-01-01T10:01:00Z" }
            ]
        }))
        .unwrap();
        assert_eq!(response.messages[0].kind, MessageType::Unknown);
        assert!(!response.messages[0].is_inbound_text());
        assert!(response.messages[1].is_inbound_text());
    }

    #[test]
    fn conversation_without_activity_sorts_as_oldest() {
        let response: ConversationsResponse = serde_json::from_value(json!({
            "conversations": [
                { "id": "fresh", "lastMessageAt": null },
                { "id": "bare" },
                { "id": "busy", "lastMessageAt": "2026-01-01T10:00:00Z" }
            ]
        }))
        .unwrap();
        let [fresh, bare, busy] = response.conversations.as_slice() else {
            panic!("expected three conversations");
        };
        assert_eq!(fresh.last_message_at, DateTime::<Utc>::default());
        assert_eq!(bare.last_message_at, DateTime::<Utc>::default());
        assert!(busy.last_message_at > fresh.last_message_at);
    }

    #[test]
    fn outbound_body_omits_unset_fields() {
        let body = OutboundMessage {
            conversation_id: "c1".into(),
            content: "hi".into(),
            direction: Direction::Outgoing,
            media_url: None,
            channel_account_id: Some("acc".into()),
            reply_to_id: None,
            forwarded: false,
            kind: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "conversationId": "c1",
                "content": "hi",
                "direction": "OUTGOING",
                "channelAccountId": "acc"
            })
        );
    }

    #[test]
    fn lead_status_hint_comes_from_tags() {
        let hints = DisplayHints::for_contact(&contact(json!({ "tags": ["VIP", "Qualified"] })));
        assert_eq!(hints.lead_status.as_deref(), Some("qualified"));
        assert_eq!(hints.platform, Platform::Whatsapp);
    }
}
