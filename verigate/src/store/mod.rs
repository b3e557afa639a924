//! Token store module for Postgres operations.
//!
//! This module provides:
//! - The token row type and its lifecycle gate
//! - An async repository over a sqlx connection pool
//!
//! ## Lifecycle
//!
//! ```text
//! issued → submitted → decided (approved | denied)
//!        ↘ expired (never submitted before expires_at)
//! ```
//!
//! The table schema lives in `schema.sql` at the crate root.

pub mod tokens;
pub mod types;

pub use tokens::{StoreError, TokenStore};
pub use types::{Decision, GateRejection, TokenRow, TOKEN_PREFIX_LEN};
