use tracing::info;

use crate::api::InboxBackend;
use crate::channel::resolve_channel_account;
use crate::error::{InboxError, Result};
use crate::thread::ThreadTicket;
use crate::types::{Conversation, Direction, Message, MessageType, OutboundMessage};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Defaults to the staged reply when sending into the open conversation.
    pub reply_to_id: Option<String>,
    pub forwarded: bool,
    pub kind: Option<MessageType>,
    /// Send somewhere other than the open conversation.
    pub target_conversation_id: Option<String>,
    /// Keep the draft after a media-only send.
    pub preserve_draft: bool,
}

/// A validated send with its target resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSend {
    pub conversation_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub reply_to_id: Option<String>,
    pub forwarded: bool,
    pub kind: Option<MessageType>,
    pub preserve_draft: bool,
    pub into_open_thread: bool,
    /// Conversation open when the send was composed.
    pub origin: Option<ThreadTicket>,
}

impl PreparedSend {
    pub fn into_outbound(self, channel_account_id: Option<String>) -> OutboundMessage {
        OutboundMessage {
            conversation_id: self.conversation_id,
            content: self.content,
            direction: Direction::Outgoing,
            media_url: self.media_url,
            channel_account_id,
            reply_to_id: self.reply_to_id,
            forwarded: self.forwarded,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub conversation_id: String,
    pub into_open_thread: bool,
    pub preserve_draft: bool,
    pub forwarded: bool,
    pub origin: Option<ThreadTicket>,
    pub echo: Option<Message>,
}

/// Draft text and staged reply of the open conversation.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
    staged_reply: Option<String>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn staged_reply(&self) -> Option<&str> {
        self.staged_reply.as_deref()
    }

    pub fn stage_reply(&mut self, message_id: impl Into<String>) {
        self.staged_reply = Some(message_id.into());
    }

    pub fn clear_reply(&mut self) {
        self.staged_reply = None;
    }

    /// Drops everything tied to the previous conversation.
    pub fn reset(&mut self) {
        self.draft.clear();
        self.staged_reply = None;
    }

    /// Validates a send before any request is issued.
    pub fn prepare(
        &self,
        open_conversation: Option<&str>,
        content: Option<&str>,
        media_url: Option<&str>,
        options: SendOptions,
    ) -> Result<PreparedSend> {
        let open = open_conversation.map(str::trim).filter(|id| !id.is_empty());
        let conversation_id = options
            .target_conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or(open)
            .ok_or(InboxError::NoTargetConversation)?
            .to_string();

        let content = content.map(str::trim).unwrap_or_default().to_string();
        let media_url = media_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        if content.is_empty() && media_url.is_none() {
            return Err(InboxError::EmptyMessage);
        }

        let into_open_thread = open == Some(conversation_id.as_str());
        let reply_to_id = options.reply_to_id.or_else(|| {
            if into_open_thread && !options.forwarded {
                self.staged_reply.clone()
            } else {
                None
            }
        });

        Ok(PreparedSend {
            conversation_id,
            content,
            media_url,
            reply_to_id,
            forwarded: options.forwarded,
            kind: options.kind,
            preserve_draft: options.preserve_draft,
            into_open_thread,
            origin: None,
        })
    }

    /// Prepares a copy of `message` flagged as forwarded into `target`.
    pub fn prepare_forward(
        &self,
        open_conversation: Option<&str>,
        message: &Message,
        target: &str,
    ) -> Result<PreparedSend> {
        let options = SendOptions {
            reply_to_id: None,
            forwarded: true,
            kind: Some(message.kind),
            target_conversation_id: Some(target.to_string()),
            preserve_draft: true,
        };
        self.prepare(
            open_conversation,
            Some(&message.content),
            message.media_url.as_deref(),
            options,
        )
    }

    /// Clears the compose state after the server accepted a send.
    pub fn on_sent(&mut self, sent: &Dispatched) {
        if !sent.preserve_draft {
            self.draft.clear();
        }
        if !sent.forwarded {
            self.staged_reply = None;
        }
    }
}

pub fn location_link(latitude: f64, longitude: f64) -> String {
    format!("https://maps.google.com/?q={latitude},{longitude}")
}

/// Resolves the channel account and posts the message.
pub async fn dispatch(
    backend: &dyn InboxBackend,
    prepared: PreparedSend,
    conversation: Option<&Conversation>,
    thread_account: Option<&str>,
) -> Result<Dispatched> {
    let thread_account = if prepared.into_open_thread {
        thread_account
    } else {
        None
    };
    let channel_account_id = resolve_channel_account(backend, conversation, thread_account).await;
    let conversation_id = prepared.conversation_id.clone();
    let into_open_thread = prepared.into_open_thread;
    let preserve_draft = prepared.preserve_draft;
    let forwarded = prepared.forwarded;
    let origin = prepared.origin.clone();

    let echo = backend
        .send_message(&prepared.into_outbound(channel_account_id))
        .await?;
    info!(%conversation_id, forwarded, "message sent");

    Ok(Dispatched {
        conversation_id,
        into_open_thread,
        preserve_draft,
        forwarded,
        origin,
        echo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_send_is_rejected_before_any_request() {
        let composer = Composer::new();
        let err = composer
            .prepare(Some("c1"), Some("   "), None, SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, InboxError::EmptyMessage));
        assert!(err.is_validation());
    }

    #[test]
    fn send_without_target_is_rejected() {
        let composer = Composer::new();
        let err = composer
            .prepare(None, Some("hi"), None, SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, InboxError::NoTargetConversation));
    }

    #[test]
    fn staged_reply_defaults_into_open_thread_only() {
        let mut composer = Composer::new();
        composer.stage_reply("m7");
        let here = composer
            .prepare(Some("c1"), Some("sure"), None, SendOptions::default())
            .unwrap();
        assert_eq!(here.reply_to_id.as_deref(), Some("m7"));
        assert!(here.into_open_thread);

        let elsewhere = composer
            .prepare(
                Some("c1"),
                Some("sure"),
                None,
                SendOptions {
                    target_conversation_id: Some("c2".into()),
                    ..SendOptions::default()
                },
            )
            .unwrap();
        assert_eq!(elsewhere.reply_to_id, None);
        assert_eq!(elsewhere.conversation_id, "c2");
    }

    #[test]
    fn media_only_send_is_valid() {
        let composer = Composer::new();
        let prepared = composer
            .prepare(Some("c1"), None, Some("https://cdn/x.ogg"), SendOptions::default())
            .unwrap();
        assert!(prepared.content.is_empty());
        assert_eq!(prepared.media_url.as_deref(), Some("https://cdn/x.ogg"));
    }

    #[test]
    fn forward_copies_source_and_keeps_compose_state() {
        let source: Message = serde_json::from_value(json!({
            "id": "m1",
            "direction": "INCOMING",
            "type": "IMAGE",
            "content": "receipt",
            "mediaUrl": "https://cdn/r.jpg",
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        let mut composer = Composer::new();
        composer.set_draft("half typed");
        composer.stage_reply("m0");

        let prepared = composer.prepare_forward(Some("c1"), &source, "c9").unwrap();
        assert!(prepared.forwarded);
        assert_eq!(prepared.kind, Some(MessageType::Image));
        assert_eq!(prepared.reply_to_id, None);

        composer.on_sent(&Dispatched {
            conversation_id: prepared.conversation_id.clone(),
            into_open_thread: prepared.into_open_thread,
            preserve_draft: prepared.preserve_draft,
            forwarded: prepared.forwarded,
            origin: prepared.origin.clone(),
            echo: None,
        });
        assert_eq!(composer.draft(), "half typed");
        assert_eq!(composer.staged_reply(), Some("m0"));
    }

    #[test]
    fn location_link_format() {
        assert_eq!(location_link(30.0444, 31.2357), "https://maps.google.com/?q=30.0444,31.2357");
    }
}
