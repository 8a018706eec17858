#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc::UnboundedReceiver, Notify};

use crm_inbox::api::InboxBackend;
use crm_inbox::engine::InboxEvent;
use crm_inbox::types::*;
use crm_inbox::{InboxError, Result};

#[derive(Default)]
pub struct Recorded {
    pub conversations: Vec<Conversation>,
    pub fail_conversations: bool,
    pub threads: HashMap<String, Vec<Message>>,
    pub flows: Vec<BotFlow>,
    pub quick_replies: Vec<Template>,
    pub approved: Vec<Template>,
    pub accounts: Vec<ChannelAccount>,
    pub groups: HashMap<String, GroupInfo>,
    /// Per-call latency of thread loads; the thread is read before waiting.
    pub thread_delays: HashMap<String, VecDeque<Duration>>,
    pub send_delay: Option<Duration>,

    pub sent: Vec<OutboundMessage>,
    pub tracked: Vec<FlowInteraction>,
    pub quick_reply_calls: Vec<(String, String)>,
    pub group_calls: Vec<(String, String)>,
    pub uploads: Vec<String>,
}

/// In-memory backend. Thread loads for a held conversation block until
/// [`FakeBackend::release`] is called.
#[derive(Default)]
pub struct FakeBackend {
    data: Mutex<Recorded>,
    held: Mutex<HashSet<String>>,
    gate: Notify,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn data(&self) -> MutexGuard<'_, Recorded> {
        self.data.lock().unwrap()
    }

    pub fn hold(&self, conversation_id: &str) {
        self.held.lock().unwrap().insert(conversation_id.to_string());
    }

    pub fn release(&self, conversation_id: &str) {
        self.held.lock().unwrap().remove(conversation_id);
        self.gate.notify_waiters();
    }

    fn is_held(&self, conversation_id: &str) -> bool {
        self.held.lock().unwrap().contains(conversation_id)
    }
}

#[async_trait]
impl InboxBackend for FakeBackend {
    async fn conversations(&self, _branch_id: Option<&str>) -> Result<Vec<Conversation>> {
        let data = self.data();
        if data.fail_conversations {
            return Err(InboxError::Status {
                endpoint: "/conversations".into(),
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(data.conversations.clone())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let (thread, delay) = {
            let mut data = self.data();
            let delay = data
                .thread_delays
                .get_mut(conversation_id)
                .and_then(VecDeque::pop_front);
            (data.threads.get(conversation_id).cloned().unwrap_or_default(), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        loop {
            let released = self.gate.notified();
            if !self.is_held(conversation_id) {
                break;
            }
            released.await;
        }
        Ok(thread)
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<Option<Message>> {
        let delay = self.data().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut data = self.data();
        data.sent.push(message.clone());
        let thread = data.threads.entry(message.conversation_id.clone()).or_default();
        let echo = outgoing(&format!("sent-{}", thread.len()), &message.content);
        thread.push(echo.clone());
        Ok(Some(echo))
    }

    async fn bot_flows(&self) -> Result<Vec<BotFlow>> {
        Ok(self.data().flows.clone())
    }

    async fn track_flow(&self, interaction: &FlowInteraction) -> Result<()> {
        self.data().tracked.push(interaction.clone());
        Ok(())
    }

    async fn quick_replies(&self, channel_account_id: &str, trigger: &str) -> Result<Vec<Template>> {
        let mut data = self.data();
        data.quick_reply_calls
            .push((channel_account_id.to_string(), trigger.to_string()));
        Ok(data.quick_replies.clone())
    }

    async fn approved_templates(&self) -> Result<Vec<Template>> {
        Ok(self.data().approved.clone())
    }

    async fn channel_accounts(&self) -> Result<Vec<ChannelAccount>> {
        Ok(self.data().accounts.clone())
    }

    async fn group(&self, account_id: &str, group_id: &str) -> Result<GroupInfo> {
        let mut data = self.data();
        data.group_calls
            .push((account_id.to_string(), group_id.to_string()));
        Ok(data.groups.get(group_id).cloned().unwrap_or_default())
    }

    async fn upload(&self, file: Upload) -> Result<String> {
        let url = format!("https://cdn.test/{}", file.file_name);
        self.data().uploads.push(file.file_name);
        Ok(url)
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    format!("2026-03-01T10:{minute:02}:00Z").parse().unwrap()
}

pub fn conversation(id: &str, phone: &str, minute: u32) -> Conversation {
    serde_json::from_value(json!({
        "id": id,
        "contact": { "id": format!("contact-{id}"), "name": format!("Contact {id}"), "phone": phone },
        "lastMessageAt": at(minute),
        "channelAccountId": "acc-1"
    }))
    .unwrap()
}

pub fn inbound(id: &str, text: &str) -> Message {
    serde_json::from_value(json!({
        "id": id,
        "direction": "INCOMING",
        "type": "TEXT",
        "content": text,
        "channelAccountId": "acc-1",
        "createdAt": at(0)
    }))
    .unwrap()
}

pub fn outgoing(id: &str, text: &str) -> Message {
    serde_json::from_value(json!({
        "id": id,
        "direction": "OUTGOING",
        "type": "TEXT",
        "content": text,
        "createdAt": at(30)
    }))
    .unwrap()
}

pub fn flow(id: &str, trigger: &str) -> BotFlow {
    BotFlow {
        id: id.to_string(),
        name: format!("flow {id}"),
        trigger: trigger.to_string(),
        is_active: true,
    }
}

pub fn template(id: &str, content: &str) -> Template {
    Template {
        id: id.to_string(),
        name: id.to_string(),
        content: content.to_string(),
    }
}

/// Waits for the first event satisfying `pred`, discarding the rest.
pub async fn wait_for<F>(events: &mut UnboundedReceiver<InboxEvent>, mut pred: F) -> InboxEvent
where
    F: FnMut(&InboxEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("engine stopped before the expected event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Everything emitted so far, without waiting.
pub fn drain(events: &mut UnboundedReceiver<InboxEvent>) -> Vec<InboxEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
