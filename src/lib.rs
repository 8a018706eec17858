//! Live conversation engine for a WhatsApp CRM inbox.
//!
//! [`engine::spawn`] starts the polling loop over an [`api::InboxBackend`];
//! all view state lives in [`inbox::InboxState`] and is driven by
//! [`engine::Command`]s.

pub mod api;
pub mod app;
pub mod channel;
pub mod composer;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod inbox;
pub mod media;
pub mod mentions;
pub mod participants;
pub mod quick_replies;
pub mod store;
pub mod thread;
pub mod triggers;
pub mod types;

pub use error::{InboxError, Result};
