//! Chat-platform webhook client.
//!
//! Uploads are forwarded as a multipart webhook execution: a `payload_json`
//! part carrying the message (text plus approve/deny buttons) and a `file`
//! part carrying the submitted bytes. `?wait=true` makes the platform
//! return the created message instead of a bare 204.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

/// Component type id for an action row.
const COMPONENT_ACTION_ROW: u8 = 1;
/// Component type id for a button.
const COMPONENT_BUTTON: u8 = 2;
/// Green button style.
const STYLE_SUCCESS: u8 = 3;
/// Red button style.
const STYLE_DANGER: u8 = 4;

/// Errors from webhook relay calls.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),

    #[error("failed to encode message payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An uploaded file ready to be relayed.
#[derive(Debug, Clone)]
pub struct SubmissionFile {
    /// Original filename from the multipart part
    pub file_name: String,
    /// Declared content type of the part
    pub content_type: String,
    /// Raw file bytes
    pub bytes: Vec<u8>,
}

impl SubmissionFile {
    /// SHA-256 digest of the file bytes, hex-encoded.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}

// =============================================================================
// Message payload types
// =============================================================================

/// Webhook message payload (`payload_json`).
#[derive(Debug, Serialize)]
pub struct WebhookMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ActionRow>,
}

/// A row of interactive components.
#[derive(Debug, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub components: Vec<Button>,
}

/// A clickable button component.
#[derive(Debug, Serialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: u8,
    pub style: u8,
    pub label: String,
    pub custom_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Build the approve/deny action row for a token.
///
/// Button custom ids carry the full token; they are routing metadata, never
/// rendered in the channel.
pub fn decision_buttons(token: &str, disabled: bool) -> ActionRow {
    ActionRow {
        kind: COMPONENT_ACTION_ROW,
        components: vec![
            Button {
                kind: COMPONENT_BUTTON,
                style: STYLE_SUCCESS,
                label: "Approve".to_string(),
                custom_id: format!("approve:{}", token),
                disabled,
            },
            Button {
                kind: COMPONENT_BUTTON,
                style: STYLE_DANGER,
                label: "Deny".to_string(),
                custom_id: format!("deny:{}", token),
                disabled,
            },
        ],
    }
}

// =============================================================================
// Relay client
// =============================================================================

/// Webhook relay with a shared HTTP client.
#[derive(Clone)]
pub struct WebhookRelay {
    client: Client,
    timeout: Duration,
}

impl WebhookRelay {
    /// Create a relay with the given outbound timeout.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Forward a submission to the token's webhook.
    ///
    /// The message names only the token prefix; reviewers act through the
    /// attached approve/deny buttons.
    pub async fn relay_submission(
        &self,
        webhook_url: &str,
        token: &str,
        token_prefix: &str,
        file: &SubmissionFile,
    ) -> Result<(), RelayError> {
        let digest = file.sha256_hex();

        let message = WebhookMessage {
            content: format!(
                "New submission for token `{}…`\nFile: `{}` ({} bytes)\nSHA-256: `{}`",
                token_prefix,
                file.file_name,
                file.bytes.len(),
                digest
            ),
            components: vec![decision_buttons(token, false)],
        };

        let payload_json = serde_json::to_string(&message)?;

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;

        let form = Form::new()
            .text("payload_json", payload_json)
            .part("file", part);

        info!(
            token_prefix = token_prefix,
            file_name = %file.file_name,
            file_size = file.bytes.len(),
            sha256 = %digest,
            "relay_submission_starting"
        );

        let response = self
            .client
            .post(format!("{}?wait=true", webhook_url))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(
                token_prefix = token_prefix,
                status_code = status,
                "relay_submission_rejected"
            );
            return Err(RelayError::Status(status));
        }

        info!(
            token_prefix = token_prefix,
            status_code = status,
            "relay_submission_complete"
        );

        Ok(())
    }

    /// Tell the channel that a token expired without a submission.
    pub async fn notify_expired(
        &self,
        webhook_url: &str,
        token_prefix: &str,
    ) -> Result<(), RelayError> {
        let message = WebhookMessage {
            content: format!(
                "Verification token `{}…` expired without a submission.",
                token_prefix
            ),
            components: Vec::new(),
        };

        let response = self
            .client
            .post(webhook_url)
            .json(&message)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(
                token_prefix = token_prefix,
                status_code = status,
                "notify_expired_rejected"
            );
            return Err(RelayError::Status(status));
        }

        info!(token_prefix = token_prefix, "notify_expired_sent");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_file_digest() {
        let file = SubmissionFile {
            file_name: "proof.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: b"hello".to_vec(),
        };

        // SHA-256 of "hello"
        assert_eq!(
            file.sha256_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_decision_buttons_custom_ids() {
        let row = decision_buttons("abc123", false);

        assert_eq!(row.components.len(), 2);
        assert_eq!(row.components[0].custom_id, "approve:abc123");
        assert_eq!(row.components[1].custom_id, "deny:abc123");
        assert!(!row.components[0].disabled);
    }

    #[test]
    fn test_message_serialization() {
        let message = WebhookMessage {
            content: "hi".to_string(),
            components: vec![decision_buttons("t", false)],
        };

        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["content"], "hi");
        assert_eq!(json["components"][0]["type"], 1);
        assert_eq!(json["components"][0]["components"][0]["type"], 2);
        assert_eq!(json["components"][0]["components"][0]["label"], "Approve");
        // Enabled buttons omit the disabled flag entirely
        assert!(json["components"][0]["components"][0].get("disabled").is_none());
    }

    #[test]
    fn test_disabled_buttons_serialize_flag() {
        let row = decision_buttons("t", true);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["components"][0]["disabled"], true);
    }

    #[test]
    fn test_plain_message_omits_components() {
        let message = WebhookMessage {
            content: "expired".to_string(),
            components: Vec::new(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("components").is_none());
    }
}
