use tracing::debug;

use crate::api::InboxBackend;
use crate::error::Result;
use crate::types::{Conversation, Message, Template};

/// What the server ranks templates against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickReplyQuery {
    pub message_id: String,
    pub channel_account_id: String,
    pub trigger: String,
}

/// Builds the ranking query from the newest inbound text message.
///
/// The channel identity comes from that message, then from any message in
/// the thread, then from the conversation itself.
pub fn query_for(conversation: Option<&Conversation>, messages: &[Message]) -> Option<QuickReplyQuery> {
    let trigger = messages.iter().rev().find(|m| m.is_inbound_text())?;
    let channel_account_id = trigger
        .channel_account()
        .or_else(|| messages.iter().rev().find_map(Message::channel_account))
        .or_else(|| {
            conversation
                .and_then(|c| c.channel_account_id.as_deref())
                .map(str::trim)
                .filter(|id| !id.is_empty())
        })?;
    Some(QuickReplyQuery {
        message_id: trigger.id.clone(),
        channel_account_id: channel_account_id.to_string(),
        trigger: trigger.content.trim().to_string(),
    })
}

pub async fn evaluate(
    backend: &dyn InboxBackend,
    conversation: Option<&Conversation>,
    messages: &[Message],
) -> Result<Vec<Template>> {
    let Some(query) = query_for(conversation, messages) else {
        return Ok(Vec::new());
    };
    fetch(backend, &query).await
}

pub async fn fetch(backend: &dyn InboxBackend, query: &QuickReplyQuery) -> Result<Vec<Template>> {
    let templates = backend
        .quick_replies(&query.channel_account_id, &query.trigger)
        .await?;
    debug!(
        message_id = %query.message_id,
        matched = templates.len(),
        "quick replies ranked"
    );
    Ok(templates)
}

/// Suggestions for the open thread, keyed by the query that produced them.
#[derive(Debug, Clone, Default)]
pub struct QuickReplies {
    key: Option<QuickReplyQuery>,
    suggestions: Vec<Template>,
}

impl QuickReplies {
    pub fn suggestions(&self) -> &[Template] {
        &self.suggestions
    }

    /// Returns the query to issue when it differs from the last one seen.
    /// An empty query clears the suggestions immediately.
    pub fn refresh_needed(&mut self, query: Option<QuickReplyQuery>) -> Option<QuickReplyQuery> {
        if query == self.key {
            return None;
        }
        self.key = query.clone();
        self.suggestions.clear();
        query
    }

    /// Stores a ranking result if it still answers the current query.
    pub fn apply(&mut self, query: &QuickReplyQuery, templates: Vec<Template>) -> bool {
        if self.key.as_ref() != Some(query) {
            return false;
        }
        self.suggestions = templates;
        true
    }

    pub fn find(&self, template_id: &str) -> Option<&Template> {
        self.suggestions.iter().find(|t| t.id == template_id)
    }

    /// Clears the visible list but remembers the query, so the same inbound
    /// message does not bring the suggestions back.
    pub fn dismiss(&mut self) {
        self.suggestions.clear();
    }

    pub fn reset(&mut self) {
        self.key = None;
        self.suggestions.clear();
    }
}
