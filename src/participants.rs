use tracing::{debug, warn};

use crate::api::InboxBackend;
use crate::channel::resolve_channel_account;
use crate::types::{Conversation, GroupInfo, Participant};

/// Fetches the member list of a group conversation. Anything short of a
/// successful lookup yields an empty group.
pub async fn resolve(
    backend: &dyn InboxBackend,
    conversation: &Conversation,
    thread_account: Option<&str>,
) -> GroupInfo {
    let Some(group_id) = conversation.contact.group_id() else {
        return GroupInfo::default();
    };
    let Some(account_id) = resolve_channel_account(backend, Some(conversation), thread_account).await else {
        debug!(conversation_id = %conversation.id, "no channel account for group lookup");
        return GroupInfo::default();
    };
    match backend.group(&account_id, &group_id).await {
        Ok(group) => group,
        Err(err) => {
            warn!(conversation_id = %conversation.id, error = %err, "group lookup failed");
            GroupInfo::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
enum CacheState {
    #[default]
    Empty,
    Loading,
    Loaded(GroupInfo),
}

/// Members of the open group conversation, fetched at most once per open.
#[derive(Debug, Default)]
pub struct ParticipantCache {
    conversation_id: Option<String>,
    state: CacheState,
}

impl ParticipantCache {
    /// Marks the conversation as loading and returns true when a lookup
    /// should be issued for it.
    pub fn begin(&mut self, conversation: &Conversation) -> bool {
        if !conversation.contact.is_group() {
            return false;
        }
        if self.conversation_id.as_deref() == Some(conversation.id.as_str())
            && self.state != CacheState::Empty
        {
            return false;
        }
        self.conversation_id = Some(conversation.id.clone());
        self.state = CacheState::Loading;
        true
    }

    pub fn apply(&mut self, conversation_id: &str, group: GroupInfo) -> bool {
        if self.conversation_id.as_deref() != Some(conversation_id) || self.state != CacheState::Loading {
            return false;
        }
        self.state = CacheState::Loaded(group);
        true
    }

    pub fn participants(&self) -> &[Participant] {
        match &self.state {
            CacheState::Loaded(group) => &group.participants,
            _ => &[],
        }
    }

    pub fn group(&self) -> Option<&GroupInfo> {
        match &self.state {
            CacheState::Loaded(group) => Some(group),
            _ => None,
        }
    }

    pub fn invalidate(&mut self) {
        self.conversation_id = None;
        self.state = CacheState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation(id: &str, phone: &str) -> Conversation {
        serde_json::from_value(json!({
            "id": id,
            "contact": { "phone": phone },
            "lastMessageAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn group(members: &[&str]) -> GroupInfo {
        GroupInfo {
            participants_count: members.len(),
            participants: members
                .iter()
                .map(|id| Participant {
                    id: id.to_string(),
                    is_admin: false,
                })
                .collect(),
        }
    }

    #[test]
    fn direct_chats_never_fetch() {
        let mut cache = ParticipantCache::default();
        assert!(!cache.begin(&conversation("c1", "201234567890")));
    }

    #[test]
    fn group_fetched_once_per_open() {
        let mut cache = ParticipantCache::default();
        let g = conversation("g1", "120363025555@g.us");
        assert!(cache.begin(&g));
        assert!(!cache.begin(&g));
        assert!(cache.apply("g1", group(&["201", "202"])));
        assert_eq!(cache.participants().len(), 2);
        assert!(!cache.begin(&g));

        cache.invalidate();
        assert!(cache.participants().is_empty());
        assert!(cache.begin(&g));
    }

    #[test]
    fn late_result_for_other_group_is_dropped() {
        let mut cache = ParticipantCache::default();
        cache.begin(&conversation("g1", "120363025555@g.us"));
        cache.invalidate();
        cache.begin(&conversation("g2", "120363026666@g.us"));
        assert!(!cache.apply("g1", group(&["201"])));
        assert!(cache.group().is_none());
    }
}
