//! Webhook relay module.
//!
//! Forwards accepted uploads to the chat-platform webhook recorded on the
//! token row, and posts plain notifications for swept tokens.
//!
//! ## Relay Flow
//!
//! ```text
//! upload handler → WebhookRelay::relay_submission() → chat channel message
//! ```

pub mod discord;

pub use discord::{RelayError, SubmissionFile, WebhookRelay};
