//! Line-oriented operator console: parses typed lines into engine commands
//! and renders engine events as text.

use std::path::PathBuf;

use chrono::Local;
use thiserror::Error;

use crate::composer::SendOptions;
use crate::engine::{Command, InboxEvent};
use crate::mentions;
use crate::store::PendingSelection;
use crate::thread::{quoted_preview, QuotedPreview};
use crate::types::{BotFlow, Conversation, Direction, Message, MessageType, Platform, Template};

pub const HELP: &str = "\
/open <id>                 open a conversation
/phone <digits>            open the conversation for a phone number
/close                     close the open conversation
/reply <n|id>              reply to a message of the open thread
/unreply                   drop the staged reply
/forward <n|id> <conv>     forward a message to another conversation
/location <lat> <lng>      send a location
/attach <path> [caption]   upload and send a file
/quick <n>                 send a suggested quick reply
/templates                 list approved templates
/template <n>              send an approved template
/accept | /dismiss         act on the suggested bot flow
/refresh                   poll now
/quit
anything else is sent as text";

#[derive(Debug)]
pub enum ConsoleInput {
    Command(Command),
    /// Needs a file read before it can become a command.
    Attach {
        path: PathBuf,
        caption: Option<String>,
    },
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("no {kind} numbered {index}")]
    OutOfRange { kind: &'static str, index: usize },
    #[error("unknown command {0}, try /help")]
    Unknown(String),
}

/// What the console last saw of the inbox; enough to resolve numbered
/// references and render threads.
#[derive(Debug, Default)]
pub struct ConsoleView {
    conversations: Vec<Conversation>,
    open: Option<String>,
    messages: Vec<Message>,
    quick_replies: Vec<Template>,
    templates: Vec<Template>,
    suggestion: Option<BotFlow>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, line: &str) -> Result<Option<ConsoleInput>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if !line.starts_with('/') {
            return Ok(Some(ConsoleInput::Command(Command::Send {
                content: Some(line.to_string()),
                media_url: None,
                options: SendOptions::default(),
            })));
        }

        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();

        let command = match name {
            "/help" => return Ok(Some(ConsoleInput::Help)),
            "/quit" | "/exit" => return Ok(Some(ConsoleInput::Quit)),
            "/open" => Command::Select(args.next().ok_or(ParseError::Usage("/open <id>"))?.to_string()),
            "/phone" => {
                let phone = args.next().ok_or(ParseError::Usage("/phone <digits>"))?;
                Command::SelectPending(PendingSelection::Phone(phone.to_string()))
            }
            "/close" => Command::Close,
            "/reply" => {
                let reference = args.next().ok_or(ParseError::Usage("/reply <n|id>"))?;
                Command::StageReply(self.message_id(reference))
            }
            "/unreply" => Command::ClearReply,
            "/forward" => {
                let (Some(reference), Some(target)) = (args.next(), args.next()) else {
                    return Err(ParseError::Usage("/forward <n|id> <conversation>"));
                };
                Command::Forward {
                    message_id: self.message_id(reference),
                    target_conversation_id: target.to_string(),
                }
            }
            "/location" => {
                let usage = ParseError::Usage("/location <lat> <lng>");
                let coords = (
                    args.next().and_then(|v| v.parse::<f64>().ok()),
                    args.next().and_then(|v| v.parse::<f64>().ok()),
                );
                let (Some(latitude), Some(longitude)) = coords else {
                    return Err(usage);
                };
                Command::SendLocation {
                    latitude,
                    longitude,
                }
            }
            "/attach" => {
                let (path, caption) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if path.is_empty() {
                    return Err(ParseError::Usage("/attach <path> [caption]"));
                }
                let caption = caption.trim();
                return Ok(Some(ConsoleInput::Attach {
                    path: PathBuf::from(path),
                    caption: (!caption.is_empty()).then(|| caption.to_string()),
                }));
            }
            "/quick" => {
                let index = index_arg(args.next(), "/quick <n>")?;
                let template = pick(&self.quick_replies, index, "quick reply")?;
                Command::SendQuickReply(template.id.clone())
            }
            "/templates" => Command::LoadApprovedTemplates,
            "/template" => {
                let index = index_arg(args.next(), "/template <n>")?;
                Command::SendTemplate(pick(&self.templates, index, "template")?.clone())
            }
            "/accept" => Command::AcceptFlow,
            "/dismiss" => Command::DismissFlow,
            "/refresh" => Command::RefreshNow,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(ConsoleInput::Command(command)))
    }

    /// Numbers refer to the rendered thread; anything else is taken as an id.
    fn message_id(&self, reference: &str) -> String {
        reference
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.messages.get(i))
            .map(|m| m.id.clone())
            .unwrap_or_else(|| reference.to_string())
    }

    /// Folds an event into the view and returns the lines to print.
    pub fn apply(&mut self, event: InboxEvent) -> Vec<String> {
        match event {
            InboxEvent::ConversationsChanged(conversations) => {
                self.conversations = conversations;
                self.render_conversations()
            }
            InboxEvent::ConversationSelected { conversation_id } => {
                let title = self
                    .conversations
                    .iter()
                    .find(|c| c.id == conversation_id)
                    .map(|c| c.contact.display_name().to_string())
                    .unwrap_or_else(|| conversation_id.clone());
                self.open = Some(conversation_id);
                self.messages.clear();
                self.quick_replies.clear();
                self.suggestion = None;
                vec![format!("== {title} ==")]
            }
            InboxEvent::ConversationClosed => {
                self.open = None;
                self.messages.clear();
                self.quick_replies.clear();
                self.suggestion = None;
                vec!["conversation closed".to_string()]
            }
            InboxEvent::ThreadChanged {
                conversation_id,
                messages,
            } => {
                if self.open.as_deref() != Some(conversation_id.as_str()) {
                    return Vec::new();
                }
                self.messages = messages;
                self.render_thread()
            }
            InboxEvent::FlowSuggested(flow) => {
                let line = format!("suggested flow: {} (/accept or /dismiss)", flow.name);
                self.suggestion = Some(flow);
                vec![line]
            }
            InboxEvent::FlowSuggestionCleared => {
                self.suggestion = None;
                Vec::new()
            }
            InboxEvent::FlowAccepted { flow, .. } => vec![format!("started flow {}", flow.name)],
            InboxEvent::QuickRepliesChanged(templates) => {
                self.quick_replies = templates;
                numbered("quick replies", &self.quick_replies)
            }
            InboxEvent::ParticipantsLoaded { group, .. } => {
                let admins = group.participants.iter().filter(|p| p.is_admin).count();
                vec![format!(
                    "group: {} participants ({admins} admins)",
                    group.participants_count
                )]
            }
            InboxEvent::ApprovedTemplates(templates) => {
                self.templates = templates;
                if self.templates.is_empty() {
                    return vec!["no approved templates".to_string()];
                }
                numbered("approved templates", &self.templates)
            }
            InboxEvent::MessageSent { .. } => Vec::new(),
            InboxEvent::Failed { action, message } => vec![format!("! {action} failed: {message}")],
            InboxEvent::Invalid { message } => vec![format!("! {message}")],
        }
    }

    pub fn render_conversations(&self) -> Vec<String> {
        self.conversations
            .iter()
            .map(|c| {
                let open = if self.open.as_deref() == Some(c.id.as_str()) { '>' } else { ' ' };
                let unread = if c.is_read { ' ' } else { '*' };
                let kind = match c.display.platform {
                    Platform::WhatsappGroup => " [group]",
                    Platform::Whatsapp => "",
                };
                let lead = c
                    .display
                    .lead_status
                    .as_deref()
                    .map(|status| format!(" ({status})"))
                    .unwrap_or_default();
                let preview = c
                    .last_message
                    .as_ref()
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                format!(
                    "{open}{unread} {}  {}{kind}{lead}  {}",
                    c.id,
                    c.contact.display_name(),
                    preview
                )
            })
            .collect()
    }

    pub fn render_thread(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (i, message) in self.messages.iter().enumerate() {
            if let Some(quoted) = quoted_preview(&self.messages, message) {
                lines.push(match quoted {
                    QuotedPreview::Loaded(preview) => format!("      > {}", preview.content),
                    QuotedPreview::Placeholder { id } => format!("      > (message {id} not loaded)"),
                });
            }
            lines.push(format!("{:>3}  {}", i + 1, self.render_message(message)));
        }
        lines
    }

    fn render_message(&self, message: &Message) -> String {
        let time = message.created_at.with_timezone(&Local).format("%H:%M");
        let arrow = match message.direction {
            Direction::Incoming => "<-",
            Direction::Outgoing => "->",
        };
        let sender = message
            .sender
            .as_ref()
            .map(|s| s.name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| format!("{name}: "))
            .unwrap_or_default();
        let forwarded = if message.metadata.forwarded { "(forwarded) " } else { "" };
        let body = mentions::resolve(&message.content, &message.metadata.mentions, &self.conversations);
        let media = match (&message.media_url, message.kind) {
            (Some(url), kind) if kind != MessageType::Text => format!(" [{}] {url}", kind.label()),
            (None, MessageType::Unknown) => format!(" [{}]", MessageType::Unknown.label()),
            _ => String::new(),
        };
        format!("{time} {arrow} {sender}{forwarded}{body}{media}")
    }
}

fn index_arg(arg: Option<&str>, usage: &'static str) -> Result<usize, ParseError> {
    arg.and_then(|v| v.parse::<usize>().ok())
        .ok_or(ParseError::Usage(usage))
}

fn pick<'a>(items: &'a [Template], index: usize, kind: &'static str) -> Result<&'a Template, ParseError> {
    index
        .checked_sub(1)
        .and_then(|i| items.get(i))
        .ok_or(ParseError::OutOfRange { kind, index })
}

fn numbered(title: &str, templates: &[Template]) -> Vec<String> {
    if templates.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("{title}:")];
    lines.extend(
        templates
            .iter()
            .enumerate()
            .map(|(i, t)| format!("  {}. {}: {}", i + 1, t.name, t.content)),
    );
    lines
}
