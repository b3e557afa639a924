//! Web server module for the verification endpoints.
//!
//! This module provides the HTTP surface of the service:
//! - Receives multipart uploads from the external form
//! - Receives signed interactions from the chat platform
//! - Issues tokens to operators
//!
//! Relay and store calls happen inline in the request; there is no queue
//! between the handler and the webhook.

pub mod handlers;
pub mod interactions;
pub mod signature;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

pub use handlers::{health, issue_token, upload, AppState, HealthResponse, UploadResponse};
pub use interactions::interactions;
pub use signature::{is_signature_verification_enabled, verify_interaction_signature};

/// Build the CORS layer for the upload form.
///
/// With no configured allow-list any origin may post uploads; the token is
/// the real access control.
pub fn cors_layer(allowed_origins: &Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    match allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "cors_origin_invalid");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(parsed))
        }
        None => layer.allow_origin(Any),
    }
}
