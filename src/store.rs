use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{digits_only, Conversation, DisplayHints};

/// A conversation requested before the list was loaded (deep link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSelection {
    Id(String),
    Phone(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub changed: bool,
    pub selected: Option<String>,
}

/// Deduplicated conversation list, newest activity first.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    /// Local `lastMessageAt` bumps not yet reflected by the server.
    bumps: HashMap<String, DateTime<Utc>>,
    pending: Option<PendingSelection>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn set_pending(&mut self, selection: PendingSelection) {
        self.pending = Some(selection);
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        self.pending.as_ref()
    }

    /// Merges a list poll. Later duplicates replace earlier ones, local bumps
    /// newer than the server's timestamp survive, and the held list is only
    /// swapped when the merged result differs.
    pub fn apply_poll(&mut self, fetched: Vec<Conversation>) -> PollOutcome {
        let mut merged: Vec<Conversation> = Vec::with_capacity(fetched.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for mut conversation in fetched {
            conversation.display = DisplayHints::for_contact(&conversation.contact);
            match index.get(&conversation.id) {
                Some(&at) => merged[at] = conversation,
                None => {
                    index.insert(conversation.id.clone(), merged.len());
                    merged.push(conversation);
                }
            }
        }

        self.bumps.retain(|id, bumped| {
            let Some(&at) = index.get(id) else {
                return false;
            };
            let conversation = &mut merged[at];
            if conversation.last_message_at >= *bumped {
                return false;
            }
            conversation.last_message_at = *bumped;
            true
        });

        sort_by_activity(&mut merged);

        let changed = merged != self.conversations;
        if changed {
            debug!(count = merged.len(), "conversation list updated");
            self.conversations = merged;
        }

        PollOutcome {
            changed,
            selected: self.resolve_pending(),
        }
    }

    /// Moves a conversation to the top after a local send.
    pub fn bump(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if conversation.last_message_at < at {
            conversation.last_message_at = at;
        }
        let stamp = conversation.last_message_at;
        self.bumps.insert(id.to_string(), stamp);
        sort_by_activity(&mut self.conversations);
        true
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(conversation) if !conversation.is_read => {
                conversation.is_read = true;
                true
            }
            _ => false,
        }
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<&Conversation> {
        let wanted = digits_only(phone);
        if wanted.is_empty() {
            return None;
        }
        self.conversations
            .iter()
            .find(|c| c.contact.phone_digits() == wanted)
    }

    /// Consumes the pending selection once it names a listed conversation.
    pub fn resolve_pending(&mut self) -> Option<String> {
        let found = match self.pending.as_ref()? {
            PendingSelection::Id(id) => self.get(id).map(|c| c.id.clone()),
            PendingSelection::Phone(phone) => self.find_by_phone(phone).map(|c| c.id.clone()),
        };
        if found.is_some() {
            self.pending = None;
        }
        found
    }
}

fn sort_by_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
