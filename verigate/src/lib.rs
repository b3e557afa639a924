//! Verigate - verification token relay service.
//!
//! This library provides shared modules for the two Verigate binaries:
//! - `verigate-web`: HTTP service for uploads, interactions, and issuance
//! - `verigate-sweeper`: Background loop expiring stale tokens
//!
//! ## Architecture
//!
//! ```text
//! Upload form → Web Server → token store (Postgres)
//!                    ↓
//!              webhook relay → chat channel → interactions → decision
//! ```

pub mod config;
pub mod relay;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use relay::{SubmissionFile, WebhookRelay};
pub use store::{Decision, TokenRow, TokenStore};
pub use web::AppState;
