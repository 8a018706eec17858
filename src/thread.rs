use tracing::debug;

use crate::types::{Message, MessagePreview};

/// Tags a thread request with the conversation and open generation it was
/// issued for. Responses whose ticket no longer matches are dropped, as are
/// responses to requests issued before one already applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadTicket {
    pub conversation_id: String,
    pub generation: u64,
    /// Issue order across all thread requests.
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadApply {
    /// The response belongs to a conversation that is no longer open, or a
    /// newer response was already applied.
    Stale,
    Unchanged,
    Replaced,
}

/// What a reply bubble shows for its quoted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotedPreview {
    Loaded(MessagePreview),
    /// Referenced message is not in the loaded history yet.
    Placeholder { id: String },
}

/// Preview of the message `message` replies to, looked up in `history` when
/// the server did not embed it.
pub fn quoted_preview(history: &[Message], message: &Message) -> Option<QuotedPreview> {
    if let Some(quoted) = &message.quoted_message {
        return Some(QuotedPreview::Loaded(quoted.clone()));
    }
    let id = message.quoted_message_id.as_deref()?;
    Some(match history.iter().find(|m| m.id == id) {
        Some(found) => QuotedPreview::Loaded(found.preview()),
        None => QuotedPreview::Placeholder { id: id.to_string() },
    })
}

/// Message list of the open conversation, replaced wholesale on every load.
#[derive(Debug, Default)]
pub struct ThreadReconciler {
    open: Option<String>,
    generation: u64,
    issued: u64,
    applied: u64,
    loaded: bool,
    messages: Vec<Message>,
}

impl ThreadReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to `conversation_id`, clearing the visible thread before
    /// the first load is issued.
    pub fn open(&mut self, conversation_id: &str) -> ThreadTicket {
        self.generation += 1;
        self.open = Some(conversation_id.to_string());
        self.loaded = false;
        self.messages.clear();
        self.issue(conversation_id)
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.open = None;
        self.loaded = false;
        self.messages.clear();
    }

    pub fn open_id(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Issues a ticket for a refresh of the currently open conversation.
    pub fn next_ticket(&mut self) -> Option<ThreadTicket> {
        let id = self.open.clone()?;
        Some(self.issue(&id))
    }

    /// The most recently issued ticket, identifying the open conversation
    /// without starting a request.
    pub fn current(&self) -> Option<ThreadTicket> {
        self.open.as_deref().map(|id| ThreadTicket {
            conversation_id: id.to_string(),
            generation: self.generation,
            seq: self.issued,
        })
    }

    /// True while the conversation and open generation still match; the
    /// sequence number is not compared.
    pub fn is_current(&self, ticket: &ThreadTicket) -> bool {
        ticket.generation == self.generation && self.open.as_deref() == Some(ticket.conversation_id.as_str())
    }

    pub fn apply(&mut self, ticket: &ThreadTicket, messages: Vec<Message>) -> ThreadApply {
        if !self.is_current(ticket) {
            debug!(
                conversation_id = %ticket.conversation_id,
                "dropping thread response for a conversation no longer open"
            );
            return ThreadApply::Stale;
        }
        if ticket.seq < self.applied {
            debug!(
                conversation_id = %ticket.conversation_id,
                seq = ticket.seq,
                applied = self.applied,
                "dropping thread response older than the one shown"
            );
            return ThreadApply::Stale;
        }
        self.applied = ticket.seq;
        let first_load = !self.loaded;
        self.loaded = true;
        if !first_load && messages == self.messages {
            return ThreadApply::Unchanged;
        }
        self.messages = messages;
        ThreadApply::Replaced
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn latest_channel_account(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(Message::channel_account)
    }

    pub fn quoted_preview(&self, message: &Message) -> Option<QuotedPreview> {
        quoted_preview(&self.messages, message)
    }

    fn issue(&mut self, conversation_id: &str) -> ThreadTicket {
        self.issued += 1;
        ThreadTicket {
            conversation_id: conversation_id.to_string(),
            generation: self.generation,
            seq: self.issued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str, status: &str, quoted: Option<&str>) -> Message {
        serde_json::from_value(json!({
            "id": id,
            "direction": "OUTGOING",
            "status": status,
            "content": format!("body {id}"),
            "quotedMessageId": quoted,
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn late_response_for_previous_conversation_is_dropped() {
        let mut thread = ThreadReconciler::new();
        let a = thread.open("a");
        let b = thread.open("b");
        assert_eq!(thread.apply(&b, vec![message("b1", "SENT", None)]), ThreadApply::Replaced);
        assert_eq!(thread.apply(&a, vec![message("a1", "SENT", None)]), ThreadApply::Stale);
        assert_eq!(thread.messages()[0].id, "b1");
    }

    #[test]
    fn reopening_same_conversation_invalidates_old_ticket() {
        let mut thread = ThreadReconciler::new();
        let first = thread.open("a");
        let second = thread.open("a");
        assert_eq!(thread.apply(&first, Vec::new()), ThreadApply::Stale);
        assert_eq!(thread.apply(&second, Vec::new()), ThreadApply::Replaced);
        assert!(thread.is_loaded());
    }

    #[test]
    fn refresh_replaces_wholesale_and_reflects_status() {
        let mut thread = ThreadReconciler::new();
        let ticket = thread.open("a");
        thread.apply(&ticket, vec![message("1", "SENT", None), message("2", "SENT", None)]);
        let refreshed = vec![message("2", "READ", None), message("1", "DELIVERED", None)];
        assert_eq!(thread.apply(&ticket, refreshed.clone()), ThreadApply::Replaced);
        assert_eq!(thread.messages(), refreshed.as_slice());
        assert_eq!(thread.apply(&ticket, refreshed), ThreadApply::Unchanged);
    }

    #[test]
    fn older_refresh_landing_after_newer_one_is_dropped() {
        let mut thread = ThreadReconciler::new();
        let open = thread.open("a");
        thread.apply(&open, vec![message("1", "SENT", None)]);

        let poll = thread.next_ticket().unwrap();
        let reload = thread.next_ticket().unwrap();
        let with_sent = vec![message("1", "SENT", None), message("2", "SENT", None)];
        assert_eq!(thread.apply(&reload, with_sent.clone()), ThreadApply::Replaced);
        assert_eq!(thread.apply(&poll, vec![message("1", "SENT", None)]), ThreadApply::Stale);
        assert_eq!(thread.messages(), with_sent.as_slice());

        let next = thread.next_ticket().unwrap();
        assert!(thread.is_current(&poll));
        assert_eq!(thread.apply(&next, with_sent), ThreadApply::Unchanged);
    }

    #[test]
    fn switching_clears_visible_thread() {
        let mut thread = ThreadReconciler::new();
        let ticket = thread.open("a");
        thread.apply(&ticket, vec![message("1", "SENT", None)]);
        thread.open("b");
        assert!(thread.messages().is_empty());
        assert!(!thread.is_loaded());
    }

    #[test]
    fn quoted_message_degrades_to_placeholder() {
        let mut thread = ThreadReconciler::new();
        let ticket = thread.open("a");
        let reply = message("2", "SENT", Some("1"));
        let orphan = message("3", "SENT", Some("missing"));
        thread.apply(&ticket, vec![message("1", "SENT", None), reply.clone(), orphan.clone()]);
        assert!(matches!(thread.quoted_preview(&reply), Some(QuotedPreview::Loaded(p)) if p.id == "1"));
        assert_eq!(
            thread.quoted_preview(&orphan),
            Some(QuotedPreview::Placeholder { id: "missing".into() })
        );
    }
}
