use std::{env, time::Duration};

use reqwest::Url;

use crate::error::{InboxError, Result};
use crate::store::PendingSelection;

const DEFAULT_API_URL: &str = "http://localhost:4000/api";

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub branch_id: Option<String>,
    pub conversation_poll: Duration,
    pub thread_poll: Duration,
    pub suggestion_cooldown: Duration,
    pub request_timeout: Duration,
    pub open_on_start: Option<PendingSelection>,
}

impl InboxConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
            branch_id: None,
            conversation_poll: Duration::from_secs(5),
            thread_poll: Duration::from_secs(3),
            suggestion_cooldown: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            open_on_start: None,
        }
    }

    /// Reads the process environment. Call `dotenvy::dotenv()` first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: Duration| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |key: &str| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let base = text("INBOX_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Url::parse(&base).map_err(|e| InboxError::Config(format!("INBOX_API_URL {base:?}: {e}")))?;

        let defaults = Self::new(base);
        let open_on_start = text("INBOX_OPEN_CONVERSATION")
            .map(PendingSelection::Id)
            .or_else(|| text("INBOX_OPEN_PHONE").map(PendingSelection::Phone));

        Ok(Self {
            api_token: text("INBOX_API_TOKEN"),
            branch_id: text("INBOX_BRANCH_ID"),
            conversation_poll: millis("INBOX_CONVERSATION_POLL_MS", defaults.conversation_poll),
            thread_poll: millis("INBOX_THREAD_POLL_MS", defaults.thread_poll),
            suggestion_cooldown: secs("INBOX_SUGGESTION_COOLDOWN_SECS").unwrap_or(defaults.suggestion_cooldown),
            request_timeout: secs("INBOX_REQUEST_TIMEOUT_SECS")
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(defaults.request_timeout),
            open_on_start,
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<InboxConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InboxConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_polling_periods() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.api_base_url, DEFAULT_API_URL);
        assert_eq!(cfg.conversation_poll, Duration::from_secs(5));
        assert_eq!(cfg.thread_poll, Duration::from_secs(3));
        assert_eq!(cfg.suggestion_cooldown, Duration::from_secs(10));
        assert!(cfg.open_on_start.is_none());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = config(&[
            ("INBOX_API_URL", "https://crm.example.com/api/"),
            ("INBOX_BRANCH_ID", "branch-7"),
            ("INBOX_THREAD_POLL_MS", "1500"),
            ("INBOX_CONVERSATION_POLL_MS", "soon"),
            ("INBOX_OPEN_PHONE", "+20 123"),
        ])
        .unwrap();
        assert_eq!(cfg.api_base_url, "https://crm.example.com/api");
        assert_eq!(cfg.branch_id.as_deref(), Some("branch-7"));
        assert_eq!(cfg.thread_poll, Duration::from_millis(1500));
        assert_eq!(cfg.conversation_poll, Duration::from_secs(5));
        assert_eq!(cfg.open_on_start, Some(PendingSelection::Phone("+20 123".into())));
    }

    #[test]
    fn zero_timeout_falls_back_but_zero_cooldown_is_kept() {
        let cfg = config(&[
            ("INBOX_REQUEST_TIMEOUT_SECS", "0"),
            ("INBOX_SUGGESTION_COOLDOWN_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(15));
        assert_eq!(cfg.suggestion_cooldown, Duration::ZERO);

        let cfg = config(&[("INBOX_REQUEST_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_unparseable_url() {
        let err = config(&[("INBOX_API_URL", "not a url")]).unwrap_err();
        assert!(matches!(err, InboxError::Config(_)));
    }
}
