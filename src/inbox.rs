//! The inbox state container.
//!
//! All view state lives here and only changes through the operations below.
//! Methods never perform I/O: they take server results tagged with the
//! request they answer and report what the driver should do next.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::composer::{Composer, Dispatched, PreparedSend, SendOptions};
use crate::error::{InboxError, Result};
use crate::participants::ParticipantCache;
use crate::quick_replies::{query_for, QuickReplies, QuickReplyQuery};
use crate::store::{ConversationStore, PendingSelection, PollOutcome};
use crate::thread::{ThreadApply, ThreadReconciler, ThreadTicket};
use crate::triggers::{evaluate_thread, SuggestionGate};
use crate::types::{BotFlow, Conversation, GroupInfo, Message, Participant, Template};

/// Follow-up work after a thread response was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadUpdate {
    pub apply: ThreadApply,
    pub suggestion_changed: bool,
    pub quick_reply_query: Option<QuickReplyQuery>,
    pub quick_replies_cleared: bool,
    /// Group members should be fetched for this conversation.
    pub fetch_participants: Option<Conversation>,
}

impl ThreadUpdate {
    fn stale() -> Self {
        Self {
            apply: ThreadApply::Stale,
            suggestion_changed: false,
            quick_reply_query: None,
            quick_replies_cleared: false,
            fetch_participants: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendEffects {
    /// Reload the open thread now instead of waiting for the next tick.
    pub reload: Option<ThreadTicket>,
    pub list_changed: bool,
}

/// Cloned view of the state for renderers and tests.
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    pub conversations: Vec<Conversation>,
    pub open_conversation_id: Option<String>,
    pub thread_loaded: bool,
    pub messages: Vec<Message>,
    pub draft: String,
    pub staged_reply: Option<String>,
    pub flow_suggestion: Option<BotFlow>,
    pub quick_replies: Vec<Template>,
    pub participants: Vec<Participant>,
    pub pending_selection: Option<PendingSelection>,
}

#[derive(Debug)]
pub struct InboxState {
    store: ConversationStore,
    thread: ThreadReconciler,
    composer: Composer,
    flows: Vec<BotFlow>,
    suggestion: SuggestionGate,
    quick_replies: QuickReplies,
    participants: ParticipantCache,
}

impl InboxState {
    pub fn new(suggestion_cooldown: Duration) -> Self {
        Self {
            store: ConversationStore::new(),
            thread: ThreadReconciler::new(),
            composer: Composer::new(),
            flows: Vec::new(),
            suggestion: SuggestionGate::new(suggestion_cooldown),
            quick_replies: QuickReplies::default(),
            participants: ParticipantCache::default(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn thread(&self) -> &ThreadReconciler {
        &self.thread
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn flow_suggestion(&self) -> Option<&BotFlow> {
        self.suggestion.current()
    }

    pub fn quick_replies(&self) -> &[Template] {
        self.quick_replies.suggestions()
    }

    pub fn participants(&self) -> &[Participant] {
        self.participants.participants()
    }

    pub fn open_conversation(&self) -> Option<&Conversation> {
        self.thread.open_id().and_then(|id| self.store.get(id))
    }

    /// Records a deep-link selection. Returns the conversation to open when
    /// the current list already contains it.
    pub fn set_pending(&mut self, selection: PendingSelection) -> Option<String> {
        self.store.set_pending(selection);
        self.store.resolve_pending()
    }

    /// Records a deep-link selection without trying to resolve it, for use
    /// before the first list poll.
    pub fn park_pending(&mut self, selection: PendingSelection) {
        self.store.set_pending(selection);
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.set_draft(text);
    }

    pub fn stage_reply(&mut self, message_id: &str) -> Result<()> {
        if self.thread.find(message_id).is_none() {
            return Err(InboxError::UnknownMessage(message_id.to_string()));
        }
        self.composer.stage_reply(message_id);
        Ok(())
    }

    pub fn clear_reply(&mut self) {
        self.composer.clear_reply();
    }

    /// List poll succeeded.
    pub fn apply_conversations(&mut self, fetched: Vec<Conversation>) -> PollOutcome {
        self.store.apply_poll(fetched)
    }

    /// Conversation selected: everything tied to the previous one is
    /// cleared before the new load is issued.
    pub fn select(&mut self, conversation_id: &str) -> ThreadTicket {
        let ticket = self.thread.open(conversation_id);
        self.flows.clear();
        self.suggestion.clear();
        self.quick_replies.reset();
        self.participants.invalidate();
        self.composer.clear_reply();
        self.store.mark_read(conversation_id);
        ticket
    }

    /// Ticket for a refresh of the open conversation.
    pub fn next_thread_ticket(&mut self) -> Option<ThreadTicket> {
        self.thread.next_ticket()
    }

    pub fn close(&mut self) {
        self.thread.close();
        self.flows.clear();
        self.suggestion.clear();
        self.quick_replies.reset();
        self.participants.invalidate();
        self.composer.reset();
    }

    /// Thread load or refresh succeeded.
    pub fn apply_thread(&mut self, ticket: &ThreadTicket, messages: Vec<Message>, now: Instant) -> ThreadUpdate {
        let apply = self.thread.apply(ticket, messages);
        if apply == ThreadApply::Stale {
            return ThreadUpdate::stale();
        }

        let suggestion_changed = self.reevaluate_suggestion(now);

        let conversation = self.store.get(&ticket.conversation_id);
        let query = query_for(conversation, self.thread.messages());
        let had_suggestions = !self.quick_replies.suggestions().is_empty();
        let quick_reply_query = self.quick_replies.refresh_needed(query);
        let quick_replies_cleared = had_suggestions && self.quick_replies.suggestions().is_empty();

        let fetch_participants = match conversation {
            Some(conversation) if self.participants.begin(conversation) => Some(conversation.clone()),
            _ => None,
        };

        ThreadUpdate {
            apply,
            suggestion_changed,
            quick_reply_query,
            quick_replies_cleared,
            fetch_participants,
        }
    }

    /// Flow table fetched for the conversation `ticket` opened. Returns
    /// `None` when the conversation has since changed.
    pub fn apply_flows(&mut self, ticket: &ThreadTicket, flows: Vec<BotFlow>, now: Instant) -> Option<bool> {
        if !self.thread.is_current(ticket) {
            return None;
        }
        self.flows = flows;
        if !self.thread.is_loaded() {
            return Some(false);
        }
        Some(self.reevaluate_suggestion(now))
    }

    pub fn apply_quick_replies(&mut self, query: &QuickReplyQuery, templates: Vec<Template>) -> bool {
        self.quick_replies.apply(query, templates)
    }

    pub fn apply_participants(&mut self, conversation_id: &str, group: GroupInfo) -> bool {
        self.participants.apply(conversation_id, group)
    }

    pub fn dismiss_suggestion(&mut self, now: Instant) -> Option<BotFlow> {
        self.suggestion.dismiss(now)
    }

    pub fn accept_suggestion(&mut self, now: Instant) -> Option<BotFlow> {
        self.suggestion.accept(now)
    }

    pub fn quick_reply(&self, template_id: &str) -> Option<&Template> {
        self.quick_replies.find(template_id)
    }

    pub fn prepare_send(
        &self,
        content: Option<&str>,
        media_url: Option<&str>,
        options: SendOptions,
    ) -> Result<PreparedSend> {
        let content = content.or_else(|| Some(self.composer.draft()));
        let mut prepared = self
            .composer
            .prepare(self.thread.open_id(), content, media_url, options)?;
        prepared.origin = self.thread.current();
        Ok(prepared)
    }

    pub fn prepare_forward(&self, message_id: &str, target_conversation_id: &str) -> Result<PreparedSend> {
        let message = self
            .thread
            .find(message_id)
            .ok_or_else(|| InboxError::UnknownMessage(message_id.to_string()))?;
        let mut prepared = self
            .composer
            .prepare_forward(self.thread.open_id(), message, target_conversation_id)?;
        prepared.origin = self.thread.current();
        Ok(prepared)
    }

    /// Send succeeded: the target conversation jumps to the top of the list.
    /// Compose state is cleared only while the conversation the send was
    /// composed in is still open; a switch in between leaves the new
    /// conversation's draft, staged reply and quick replies alone.
    pub fn record_sent(&mut self, sent: &Dispatched, at: DateTime<Utc>) -> SendEffects {
        if let Some(origin) = sent.origin.as_ref().filter(|origin| self.thread.is_current(origin)) {
            self.composer.on_sent(sent);
            if origin.conversation_id == sent.conversation_id {
                self.quick_replies.dismiss();
            }
        }
        let list_changed = self.store.bump(&sent.conversation_id, at);
        let reload = if self.thread.open_id() == Some(sent.conversation_id.as_str()) {
            self.thread.next_ticket()
        } else {
            None
        };
        SendEffects {
            reload,
            list_changed,
        }
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        InboxSnapshot {
            conversations: self.store.list().to_vec(),
            open_conversation_id: self.thread.open_id().map(str::to_string),
            thread_loaded: self.thread.is_loaded(),
            messages: self.thread.messages().to_vec(),
            draft: self.composer.draft().to_string(),
            staged_reply: self.composer.staged_reply().map(str::to_string),
            flow_suggestion: self.suggestion.current().cloned(),
            quick_replies: self.quick_replies.suggestions().to_vec(),
            participants: self.participants.participants().to_vec(),
            pending_selection: self.store.pending().cloned(),
        }
    }

    fn reevaluate_suggestion(&mut self, now: Instant) -> bool {
        let matched = evaluate_thread(self.thread.messages(), &self.flows);
        self.suggestion.offer(matched, now)
    }
}
