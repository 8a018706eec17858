//! Polling scheduler and command loop driving [`InboxState`].
//!
//! One task owns the state. Backend calls run as spawned tasks and report
//! back through a completion channel, so user commands and timer ticks
//! interleave with in-flight requests without sharing mutable state.

use std::{future::Future, sync::Arc, time::Instant};

use chrono::Utc;
use serde_json::json;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::api::InboxBackend;
use crate::composer::{self, location_link, Dispatched, PreparedSend, SendOptions};
use crate::config::InboxConfig;
use crate::error::{InboxError, Result};
use crate::inbox::{InboxSnapshot, InboxState};
use crate::media::message_type_from_mime;
use crate::participants;
use crate::quick_replies::{self, QuickReplyQuery};
use crate::store::PendingSelection;
use crate::thread::{ThreadApply, ThreadTicket};
use crate::types::{
    BotFlow, Conversation, FlowAction, FlowInteraction, GroupInfo, Message, MessageType, Template,
    Upload,
};

#[derive(Debug)]
pub enum Command {
    Select(String),
    SelectPending(PendingSelection),
    Close,
    SetDraft(String),
    StageReply(String),
    ClearReply,
    /// `content: None` sends the current draft.
    Send {
        content: Option<String>,
        media_url: Option<String>,
        options: SendOptions,
    },
    Forward {
        message_id: String,
        target_conversation_id: String,
    },
    SendLocation {
        latitude: f64,
        longitude: f64,
    },
    SendAttachment {
        upload: Upload,
        caption: Option<String>,
    },
    SendQuickReply(String),
    SendTemplate(Template),
    LoadApprovedTemplates,
    AcceptFlow,
    DismissFlow,
    RefreshNow,
    Snapshot(oneshot::Sender<InboxSnapshot>),
}

#[derive(Debug, Clone)]
pub enum InboxEvent {
    ConversationsChanged(Vec<Conversation>),
    ConversationSelected { conversation_id: String },
    ConversationClosed,
    ThreadChanged {
        conversation_id: String,
        messages: Vec<Message>,
    },
    FlowSuggested(BotFlow),
    FlowSuggestionCleared,
    FlowAccepted {
        conversation_id: String,
        flow: BotFlow,
    },
    QuickRepliesChanged(Vec<Template>),
    ParticipantsLoaded {
        conversation_id: String,
        group: GroupInfo,
    },
    ApprovedTemplates(Vec<Template>),
    MessageSent { conversation_id: String },
    /// A user-initiated request failed at the transport or server.
    Failed { action: &'static str, message: String },
    /// A user action was rejected before any request was issued.
    Invalid { message: String },
}

enum Completion {
    Conversations(Result<Vec<Conversation>>),
    Thread {
        ticket: ThreadTicket,
        result: Result<Vec<Message>>,
    },
    Flows {
        ticket: ThreadTicket,
        result: Result<Vec<BotFlow>>,
    },
    QuickReplies {
        query: QuickReplyQuery,
        result: Result<Vec<Template>>,
    },
    Participants {
        conversation_id: String,
        group: GroupInfo,
    },
    Sent(Result<Dispatched>),
    Uploaded {
        conversation_id: String,
        origin: Option<ThreadTicket>,
        kind: MessageType,
        caption: Option<String>,
        result: Result<String>,
    },
    ApprovedTemplates(Result<Vec<Template>>),
}

/// Cheap handle for issuing commands to a running engine.
#[derive(Clone)]
pub struct InboxHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl InboxHandle {
    /// Returns false once the engine has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn select(&self, conversation_id: impl Into<String>) -> bool {
        self.send(Command::Select(conversation_id.into()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Command::Send {
            content: Some(text.into()),
            media_url: None,
            options: SendOptions::default(),
        })
    }

    pub async fn snapshot(&self) -> Option<InboxSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }
}

/// Engine clock. Follows tokio's clock so paused-time tests drive the
/// suggestion cool-down too.
fn now() -> Instant {
    time::Instant::now().into_std()
}

pub struct InboxEngine {
    backend: Arc<dyn InboxBackend>,
    config: InboxConfig,
    state: InboxState,
    events: mpsc::UnboundedSender<InboxEvent>,
    done: mpsc::UnboundedSender<Completion>,
    list_in_flight: bool,
    thread_in_flight: Option<ThreadTicket>,
}

/// Starts the engine on the current runtime.
pub fn spawn(
    backend: Arc<dyn InboxBackend>,
    config: InboxConfig,
) -> (InboxHandle, mpsc::UnboundedReceiver<InboxEvent>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    let mut state = InboxState::new(config.suggestion_cooldown);
    if let Some(selection) = config.open_on_start.clone() {
        state.park_pending(selection);
    }
    let engine = InboxEngine {
        backend,
        config,
        state,
        events: event_tx,
        done: done_tx,
        list_in_flight: false,
        thread_in_flight: None,
    };
    let task = tokio::spawn(engine.run(command_rx, done_rx));
    (InboxHandle { commands: command_tx }, event_rx, task)
}

impl InboxEngine {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(
            api = %self.config.api_base_url,
            branch = self.config.branch_id.as_deref().unwrap_or("all"),
            "inbox engine started"
        );
        let mut list_tick = time::interval(self.config.conversation_poll);
        list_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut thread_tick = time::interval(self.config.thread_poll);
        thread_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let restart_thread_timer = tokio::select! {
                _ = list_tick.tick() => {
                    self.poll_conversations();
                    false
                }
                _ = thread_tick.tick(), if self.state.thread().open_id().is_some() => {
                    self.poll_thread(false);
                    false
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(completion) = done.recv() => self.complete(completion),
            };
            if restart_thread_timer {
                thread_tick.reset();
            }
        }
        info!("inbox engine stopped");
    }

    fn emit(&self, event: InboxEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let done = self.done.clone();
        tokio::spawn(async move {
            let _ = done.send(request.await);
        });
    }

    fn poll_conversations(&mut self) {
        if self.list_in_flight {
            debug!("conversation poll still in flight, skipping tick");
            return;
        }
        self.list_in_flight = true;
        let backend = self.backend.clone();
        let branch = self.config.branch_id.clone();
        self.spawn_request(async move {
            Completion::Conversations(backend.conversations(branch.as_deref()).await)
        });
    }

    fn poll_thread(&mut self, forced: bool) {
        if !forced {
            if let Some(pending) = &self.thread_in_flight {
                if self.state.thread().is_current(pending) {
                    debug!(conversation_id = %pending.conversation_id, "thread poll still in flight, skipping tick");
                    return;
                }
            }
        }
        let Some(ticket) = self.state.next_thread_ticket() else {
            return;
        };
        self.load_thread(ticket);
    }

    fn load_thread(&mut self, ticket: ThreadTicket) {
        self.thread_in_flight = Some(ticket.clone());
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend.messages(&ticket.conversation_id).await;
            Completion::Thread { ticket, result }
        });
    }

    /// Returns true when the open conversation changed.
    fn select(&mut self, conversation_id: String) -> bool {
        let had_suggestion = self.state.flow_suggestion().is_some();
        let had_quick_replies = !self.state.quick_replies().is_empty();
        let ticket = self.state.select(&conversation_id);
        info!(%conversation_id, "conversation opened");

        self.emit(InboxEvent::ConversationSelected {
            conversation_id: conversation_id.clone(),
        });
        self.emit(InboxEvent::ThreadChanged {
            conversation_id,
            messages: Vec::new(),
        });
        if had_suggestion {
            self.emit(InboxEvent::FlowSuggestionCleared);
        }
        if had_quick_replies {
            self.emit(InboxEvent::QuickRepliesChanged(Vec::new()));
        }

        self.load_thread(ticket.clone());
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend.bot_flows().await;
            Completion::Flows { ticket, result }
        });
        true
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Select(conversation_id) => return self.select(conversation_id),
            Command::SelectPending(selection) => match self.state.set_pending(selection) {
                Some(conversation_id) => return self.select(conversation_id),
                None => self.poll_conversations(),
            },
            Command::Close => {
                self.state.close();
                self.thread_in_flight = None;
                self.emit(InboxEvent::ConversationClosed);
            }
            Command::SetDraft(text) => self.state.set_draft(text),
            Command::StageReply(message_id) => {
                if let Err(err) = self.state.stage_reply(&message_id) {
                    self.reject(err);
                }
            }
            Command::ClearReply => self.state.clear_reply(),
            Command::Send {
                content,
                media_url,
                options,
            } => {
                let prepared = self
                    .state
                    .prepare_send(content.as_deref(), media_url.as_deref(), options);
                self.start_send(prepared);
            }
            Command::Forward {
                message_id,
                target_conversation_id,
            } => {
                let prepared = self
                    .state
                    .prepare_forward(&message_id, &target_conversation_id);
                self.start_send(prepared);
            }
            Command::SendLocation {
                latitude,
                longitude,
            } => {
                let options = SendOptions {
                    kind: Some(MessageType::Location),
                    preserve_draft: true,
                    ..SendOptions::default()
                };
                let link = location_link(latitude, longitude);
                let prepared = self.state.prepare_send(Some(&link), None, options);
                self.start_send(prepared);
            }
            Command::SendAttachment { upload, caption } => self.start_upload(upload, caption),
            Command::SendQuickReply(template_id) => {
                let content = self.state.quick_reply(&template_id).map(|t| t.content.clone());
                match content {
                    Some(content) => {
                        let prepared = self
                            .state
                            .prepare_send(Some(&content), None, SendOptions::default());
                        self.start_send(prepared);
                    }
                    None => self.emit(InboxEvent::Invalid {
                        message: format!("no quick reply {template_id}"),
                    }),
                }
            }
            Command::SendTemplate(template) => {
                let prepared = self
                    .state
                    .prepare_send(Some(&template.content), None, SendOptions::default());
                self.start_send(prepared);
            }
            Command::LoadApprovedTemplates => {
                let backend = self.backend.clone();
                self.spawn_request(async move {
                    Completion::ApprovedTemplates(backend.approved_templates().await)
                });
            }
            Command::AcceptFlow => {
                if let Some(flow) = self.state.accept_suggestion(now()) {
                    self.track_flow(&flow, FlowAction::Accepted);
                    self.emit(InboxEvent::FlowSuggestionCleared);
                    if let Some(conversation_id) = self.state.thread().open_id() {
                        self.emit(InboxEvent::FlowAccepted {
                            conversation_id: conversation_id.to_string(),
                            flow,
                        });
                    }
                }
            }
            Command::DismissFlow => {
                if let Some(flow) = self.state.dismiss_suggestion(now()) {
                    self.track_flow(&flow, FlowAction::Dismissed);
                    self.emit(InboxEvent::FlowSuggestionCleared);
                }
            }
            Command::RefreshNow => {
                self.poll_conversations();
                self.poll_thread(true);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
        }
        false
    }

    fn reject(&self, err: InboxError) {
        debug!(error = %err, "rejected user action");
        self.emit(InboxEvent::Invalid {
            message: err.to_string(),
        });
    }

    fn start_send(&mut self, prepared: Result<PreparedSend>) {
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.reject(err),
        };
        let conversation = self.state.store().get(&prepared.conversation_id).cloned();
        let thread_account = self
            .state
            .thread()
            .latest_channel_account()
            .map(str::to_string);
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = composer::dispatch(
                backend.as_ref(),
                prepared,
                conversation.as_ref(),
                thread_account.as_deref(),
            )
            .await;
            Completion::Sent(result)
        });
    }

    fn start_upload(&mut self, upload: Upload, caption: Option<String>) {
        let Some(conversation_id) = self.state.thread().open_id().map(str::to_string) else {
            return self.reject(InboxError::NoTargetConversation);
        };
        let origin = self.state.thread().current();
        let kind = message_type_from_mime(&upload.content_type);
        let backend = self.backend.clone();
        self.spawn_request(async move {
            let result = backend.upload(upload).await;
            Completion::Uploaded {
                conversation_id,
                origin,
                kind,
                caption,
                result,
            }
        });
    }

    fn track_flow(&self, flow: &BotFlow, action: FlowAction) {
        let Some(conversation) = self.state.open_conversation() else {
            return;
        };
        let interaction = FlowInteraction {
            flow_id: flow.id.clone(),
            contact_id: conversation.contact.id.clone(),
            action,
            step_index: 0,
            metadata: json!({
                "conversationId": conversation.id,
                "trigger": flow.trigger,
            }),
        };
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.track_flow(&interaction).await {
                debug!(flow_id = %interaction.flow_id, error = %err, "flow tracking failed");
            }
        });
    }

    /// Returns true when the open conversation changed.
    fn complete(&mut self, completion: Completion) -> bool {
        match completion {
            Completion::Conversations(result) => {
                self.list_in_flight = false;
                match result {
                    Ok(conversations) => {
                        let outcome = self.state.apply_conversations(conversations);
                        if outcome.changed {
                            self.emit(InboxEvent::ConversationsChanged(
                                self.state.store().list().to_vec(),
                            ));
                        }
                        if let Some(conversation_id) = outcome.selected {
                            return self.select(conversation_id);
                        }
                    }
                    Err(err) => warn!(error = %err, "conversation poll failed"),
                }
            }
            Completion::Thread { ticket, result } => {
                if self.thread_in_flight.as_ref() == Some(&ticket) {
                    self.thread_in_flight = None;
                }
                match result {
                    Ok(messages) => self.apply_thread(&ticket, messages),
                    Err(err) => debug!(
                        conversation_id = %ticket.conversation_id,
                        error = %err,
                        "thread poll failed"
                    ),
                }
            }
            Completion::Flows { ticket, result } => match result {
                Ok(flows) => {
                    if self.state.apply_flows(&ticket, flows, now()) == Some(true) {
                        self.emit_suggestion();
                    }
                }
                Err(err) => debug!(error = %err, "bot flow fetch failed"),
            },
            Completion::QuickReplies { query, result } => match result {
                Ok(templates) => {
                    if self.state.apply_quick_replies(&query, templates) {
                        self.emit(InboxEvent::QuickRepliesChanged(
                            self.state.quick_replies().to_vec(),
                        ));
                    }
                }
                Err(err) => debug!(error = %err, "quick reply ranking failed"),
            },
            Completion::Participants {
                conversation_id,
                group,
            } => {
                if self.state.apply_participants(&conversation_id, group.clone()) {
                    self.emit(InboxEvent::ParticipantsLoaded {
                        conversation_id,
                        group,
                    });
                }
            }
            Completion::Sent(result) => self.finish_send(result),
            Completion::Uploaded {
                conversation_id,
                origin,
                kind,
                caption,
                result,
            } => match result {
                Ok(url) => {
                    let options = SendOptions {
                        kind: Some(kind),
                        target_conversation_id: Some(conversation_id),
                        preserve_draft: caption.is_none(),
                        ..SendOptions::default()
                    };
                    let content = caption.unwrap_or_default();
                    let prepared = self
                        .state
                        .prepare_send(Some(&content), Some(&url), options)
                        .map(|mut prepared| {
                            prepared.origin = origin;
                            prepared
                        });
                    self.start_send(prepared);
                }
                Err(err) => {
                    warn!(error = %err, "attachment upload failed");
                    self.emit(InboxEvent::Failed {
                        action: "upload",
                        message: err.to_string(),
                    });
                }
            },
            Completion::ApprovedTemplates(result) => match result {
                Ok(templates) => self.emit(InboxEvent::ApprovedTemplates(templates)),
                Err(err) => {
                    warn!(error = %err, "approved template fetch failed");
                    self.emit(InboxEvent::Failed {
                        action: "templates",
                        message: err.to_string(),
                    });
                }
            },
        }
        false
    }

    fn apply_thread(&mut self, ticket: &ThreadTicket, messages: Vec<Message>) {
        let update = self.state.apply_thread(ticket, messages, now());
        if update.apply == ThreadApply::Stale {
            return;
        }
        if update.apply == ThreadApply::Replaced {
            self.emit(InboxEvent::ThreadChanged {
                conversation_id: ticket.conversation_id.clone(),
                messages: self.state.thread().messages().to_vec(),
            });
        }
        if update.suggestion_changed {
            self.emit_suggestion();
        }
        if update.quick_replies_cleared {
            self.emit(InboxEvent::QuickRepliesChanged(Vec::new()));
        }
        if let Some(query) = update.quick_reply_query {
            let backend = self.backend.clone();
            self.spawn_request(async move {
                let result = quick_replies::fetch(backend.as_ref(), &query).await;
                Completion::QuickReplies { query, result }
            });
        }
        if let Some(conversation) = update.fetch_participants {
            let thread_account = self
                .state
                .thread()
                .latest_channel_account()
                .map(str::to_string);
            let backend = self.backend.clone();
            self.spawn_request(async move {
                let group =
                    participants::resolve(backend.as_ref(), &conversation, thread_account.as_deref())
                        .await;
                Completion::Participants {
                    conversation_id: conversation.id,
                    group,
                }
            });
        }
    }

    fn emit_suggestion(&self) {
        match self.state.flow_suggestion() {
            Some(flow) => self.emit(InboxEvent::FlowSuggested(flow.clone())),
            None => self.emit(InboxEvent::FlowSuggestionCleared),
        }
    }

    fn finish_send(&mut self, result: Result<Dispatched>) {
        let sent = match result {
            Ok(sent) => sent,
            Err(err) => {
                warn!(error = %err, "send failed");
                self.emit(InboxEvent::Failed {
                    action: "send",
                    message: err.to_string(),
                });
                return;
            }
        };
        let at = sent
            .echo
            .as_ref()
            .map(|message| message.created_at)
            .unwrap_or_else(Utc::now);
        let had_quick_replies = !self.state.quick_replies().is_empty();
        let effects = self.state.record_sent(&sent, at);

        self.emit(InboxEvent::MessageSent {
            conversation_id: sent.conversation_id.clone(),
        });
        if had_quick_replies && self.state.quick_replies().is_empty() {
            self.emit(InboxEvent::QuickRepliesChanged(Vec::new()));
        }
        if effects.list_changed {
            self.emit(InboxEvent::ConversationsChanged(
                self.state.store().list().to_vec(),
            ));
        }
        if let Some(ticket) = effects.reload {
            self.load_thread(ticket);
        }
    }
}
