use thiserror::Error;

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} rejected the request: {message}")]
    Rejected { endpoint: String, message: String },

    #[error("malformed payload from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("message has no text and no media")]
    EmptyMessage,

    #[error("no conversation is open and no target was given")]
    NoTargetConversation,

    #[error("message {0} is not in the open thread")]
    UnknownMessage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InboxError {
    /// Validation failures are caught before any request is issued.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InboxError::EmptyMessage
                | InboxError::NoTargetConversation
                | InboxError::UnknownMessage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, InboxError>;
