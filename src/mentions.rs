use std::{borrow::Cow, fmt, sync::OnceLock};

use regex::Regex;

use crate::types::{digits_only, Conversation, Mention};

/// Shortest digit run compared against a contact phone; shorter keys would
/// match almost any number.
const MIN_MATCH_DIGITS: usize = 7;

const MENTION_PATTERN: &str =
    r"@(\d{10,})(?:@(?:g\.us|c\.us|s\.whatsapp\.net|lid))?|(\d{10,})@(?:g\.us|c\.us|s\.whatsapp\.net|lid)";

fn mention_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(MENTION_PATTERN).ok()).as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Mention { phone: String, name: Option<String> },
}

impl Segment<'_> {
    pub fn display(&self) -> Cow<'_, str> {
        match self {
            Segment::Text(text) => Cow::Borrowed(*text),
            Segment::Mention {
                name: Some(name), ..
            } => Cow::Owned(format!("@{name}")),
            Segment::Mention { phone, .. } => Cow::Owned(format!("@{phone}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayText<'a> {
    /// No mention tokens; the original body.
    Plain(&'a str),
    Segments(Vec<Segment<'a>>),
}

impl DisplayText<'_> {
    pub fn parts(&self) -> Vec<Cow<'_, str>> {
        match self {
            DisplayText::Plain(text) => vec![Cow::Borrowed(*text)],
            DisplayText::Segments(segments) => segments.iter().map(Segment::display).collect(),
        }
    }
}

impl fmt::Display for DisplayText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in self.parts() {
            f.write_str(&part)?;
        }
        Ok(())
    }
}

/// Replaces phone-shaped mention tokens with display names.
///
/// Names come from the message's explicit mention list first, then from any
/// known conversation whose contact phone overlaps the token digits. Tokens
/// that resolve to nothing keep their raw digits.
pub fn resolve<'a>(text: &'a str, explicit: &[Mention], known: &[Conversation]) -> DisplayText<'a> {
    let Some(regex) = mention_regex() else {
        return DisplayText::Plain(text);
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for caps in regex.captures_iter(text) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1).or_else(|| caps.get(2))) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(Segment::Text(&text[cursor..whole.start()]));
        }
        let phone = digits_only(digits.as_str());
        let name = lookup_name(&phone, explicit, known);
        segments.push(Segment::Mention { phone, name });
        cursor = whole.end();
    }

    if segments.is_empty() {
        return DisplayText::Plain(text);
    }
    if cursor < text.len() {
        segments.push(Segment::Text(&text[cursor..]));
    }
    DisplayText::Segments(segments)
}

fn lookup_name(phone: &str, explicit: &[Mention], known: &[Conversation]) -> Option<String> {
    let from_metadata = explicit
        .iter()
        .filter(|mention| digits_only(&mention.id) == phone)
        .map(|mention| mention.name.trim())
        .find(|name| !name.is_empty());
    if let Some(name) = from_metadata {
        return Some(name.to_string());
    }

    known
        .iter()
        .filter(|conversation| !conversation.contact.is_group())
        .filter(|conversation| phones_overlap(&conversation.contact.phone_digits(), phone))
        .map(|conversation| conversation.contact.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Either number may carry a country code the other lacks.
fn phones_overlap(candidate: &str, key: &str) -> bool {
    if candidate.len() < MIN_MATCH_DIGITS || key.len() < MIN_MATCH_DIGITS {
        return false;
    }
    candidate.contains(key) || key.contains(candidate)
}
