use tracing::warn;

use crate::api::InboxBackend;
use crate::types::Conversation;

fn non_blank(id: Option<&str>) -> Option<&str> {
    id.map(str::trim).filter(|id| !id.is_empty())
}

fn known_account(conversation: Option<&Conversation>, thread_account: Option<&str>) -> Option<String> {
    non_blank(conversation.and_then(|c| c.channel_account_id.as_deref()))
        .or_else(|| non_blank(thread_account))
        .map(str::to_string)
}

/// Picks the channel account to talk through: the conversation's own, then
/// the newest thread message carrying one, then the first connected account.
pub async fn resolve_channel_account(
    backend: &dyn InboxBackend,
    conversation: Option<&Conversation>,
    thread_account: Option<&str>,
) -> Option<String> {
    if let Some(id) = known_account(conversation, thread_account) {
        return Some(id);
    }
    match backend.channel_accounts().await {
        Ok(accounts) => accounts
            .into_iter()
            .find(|account| account.is_connected())
            .map(|account| account.id),
        Err(err) => {
            warn!(error = %err, "could not list channel accounts");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_account_beats_thread_account() {
        let conversation: Conversation = serde_json::from_value(json!({
            "id": "c1",
            "channelAccountId": "conv-acc",
            "lastMessageAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            known_account(Some(&conversation), Some("thread-acc")).as_deref(),
            Some("conv-acc")
        );
        assert_eq!(known_account(None, Some(" thread-acc ")).as_deref(), Some("thread-acc"));
        assert_eq!(known_account(None, None), None);
    }
}
