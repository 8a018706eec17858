use std::time::{Duration, Instant};

use crate::types::{BotFlow, Message};

/// How many of the newest messages are scanned for flow triggers.
pub const TRIGGER_LOOKBACK: usize = 3;

/// Finds the flow proposed by the newest of the last three texts that
/// contains an active trigger. `texts` is oldest first.
pub fn evaluate<'f, S: AsRef<str>>(texts: &[S], flows: &'f [BotFlow]) -> Option<&'f BotFlow> {
    let active = flows
        .iter()
        .filter(|flow| flow.is_active)
        .map(|flow| (flow, flow.trigger.trim().to_lowercase()))
        .filter(|(_, trigger)| !trigger.is_empty())
        .collect::<Vec<_>>();
    if active.is_empty() {
        return None;
    }

    texts
        .iter()
        .rev()
        .take(TRIGGER_LOOKBACK)
        .map(|text| text.as_ref().to_lowercase())
        .find_map(|text| {
            active
                .iter()
                .find(|(_, trigger)| text.contains(trigger.as_str()))
                .map(|(flow, _)| *flow)
        })
}

pub fn evaluate_thread<'f>(messages: &[Message], flows: &'f [BotFlow]) -> Option<&'f BotFlow> {
    let start = messages.len().saturating_sub(TRIGGER_LOOKBACK);
    let texts = messages[start..]
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    evaluate(&texts, flows)
}

/// Holds the surfaced flow suggestion and the dismissal cool-down.
///
/// A dismissed suggestion stays hidden until the cool-down lapses; after
/// that the flow is proposed again if its trigger is still in the window.
#[derive(Debug, Clone)]
pub struct SuggestionGate {
    cooldown: Duration,
    suppressed_until: Option<Instant>,
    current: Option<BotFlow>,
}

impl SuggestionGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            suppressed_until: None,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&BotFlow> {
        self.current.as_ref()
    }

    /// Feeds a fresh evaluation; returns true when the visible suggestion changed.
    pub fn offer(&mut self, matched: Option<&BotFlow>, now: Instant) -> bool {
        let next = if self.is_suppressed(now) {
            None
        } else {
            self.suppressed_until = None;
            matched.cloned()
        };
        if next == self.current {
            return false;
        }
        self.current = next;
        true
    }

    /// Hides the suggestion and returns the flow that was dismissed.
    pub fn dismiss(&mut self, now: Instant) -> Option<BotFlow> {
        self.suppressed_until = Some(now + self.cooldown);
        self.current.take()
    }

    /// Consumes the suggestion. The accepted flow is held back for the same
    /// cool-down so it is not proposed again while it runs.
    pub fn accept(&mut self, now: Instant) -> Option<BotFlow> {
        let accepted = self.current.take()?;
        self.suppressed_until = Some(now + self.cooldown);
        Some(accepted)
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.suppressed_until = None;
    }

    fn is_suppressed(&self, now: Instant) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str, trigger: &str) -> BotFlow {
        BotFlow {
            id: id.to_string(),
            name: format!("flow {id}"),
            trigger: trigger.to_string(),
            is_active: true,
        }
    }

    #[test]
    fn matches_within_lookback() {
        let flows = vec![flow("refund", "refund")];
        let hit = evaluate(&["hi", "need a refund", "ok thanks"], &flows);
        assert_eq!(hit.map(|f| f.id.as_str()), Some("refund"));
    }

    #[test]
    fn ignores_trigger_outside_lookback() {
        let flows = vec![flow("refund", "refund")];
        assert!(evaluate(&["refund", "a", "b", "c"], &flows).is_none());
    }

    #[test]
    fn newest_message_wins() {
        let flows = vec![flow("refund", "refund"), flow("book", "BOOKING")];
        let hit = evaluate(&["refund please", "actually a booking"], &flows);
        assert_eq!(hit.map(|f| f.id.as_str()), Some("book"));
    }

    #[test]
    fn inactive_and_blank_triggers_never_match() {
        let mut inactive = flow("refund", "refund");
        inactive.is_active = false;
        let flows = vec![inactive, flow("blank", "  ")];
        assert!(evaluate(&["refund"], &flows).is_none());
    }

    #[test]
    fn dismissal_cools_down_then_resumes() {
        let start = Instant::now();
        let refund = flow("refund", "refund");
        let mut gate = SuggestionGate::new(Duration::from_secs(10));

        assert!(gate.offer(Some(&refund), start));
        assert_eq!(gate.dismiss(start).map(|f| f.id), Some("refund".to_string()));

        assert!(!gate.offer(Some(&refund), start + Duration::from_secs(9)));
        assert!(gate.current().is_none());

        assert!(gate.offer(Some(&refund), start + Duration::from_secs(10)));
        assert_eq!(gate.current().map(|f| f.id.as_str()), Some("refund"));
    }

    #[test]
    fn accepted_flow_is_held_back() {
        let start = Instant::now();
        let refund = flow("refund", "refund");
        let mut gate = SuggestionGate::new(Duration::from_secs(10));
        gate.offer(Some(&refund), start);
        assert!(gate.accept(start).is_some());
        assert!(gate.accept(start).is_none());
        assert!(!gate.offer(Some(&refund), start + Duration::from_secs(3)));
    }

    #[test]
    fn clear_drops_cooldown() {
        let start = Instant::now();
        let refund = flow("refund", "refund");
        let mut gate = SuggestionGate::new(Duration::from_secs(10));
        gate.offer(Some(&refund), start);
        gate.dismiss(start);
        gate.clear();
        assert!(gate.offer(Some(&refund), start));
    }
}
