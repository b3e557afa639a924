//! Chat-platform interaction endpoint.
//!
//! Button presses on relayed submissions arrive here as signed interaction
//! requests. The raw body is verified against the application public key
//! before any parsing happens; the platform also probes the endpoint with
//! PING interactions that must be answered with PONG.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::relay::discord::{decision_buttons, ActionRow};
use crate::store::{Decision, StoreError, TokenRow};
use crate::web::handlers::AppState;
use crate::web::signature::{is_signature_verification_enabled, verify_interaction_signature};

/// Incoming interaction type: liveness probe.
const INTERACTION_PING: u8 = 1;
/// Incoming interaction type: message component (button press).
const INTERACTION_MESSAGE_COMPONENT: u8 = 3;

/// Response type: PONG.
const RESPONSE_PONG: u8 = 1;
/// Response type: new message, visible only to the pressing user.
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
/// Response type: edit the message the button lives on.
const RESPONSE_UPDATE_MESSAGE: u8 = 7;

/// Message flag marking a response as ephemeral.
const FLAG_EPHEMERAL: u64 = 64;

// =============================================================================
// Wire types
// =============================================================================

/// Incoming interaction payload (only the fields this service reads).
#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

/// Component payload of a button press.
#[derive(Debug, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub custom_id: Option<String>,
}

/// Outgoing interaction response.
#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

/// Message body of an interaction response.
#[derive(Debug, Serialize)]
pub struct ResponseData {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ActionRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

impl InteractionResponse {
    fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    /// Edit the submission message: state the outcome, disable the buttons.
    fn update_message(content: String, token: &str) -> Self {
        Self {
            kind: RESPONSE_UPDATE_MESSAGE,
            data: Some(ResponseData {
                content,
                components: vec![decision_buttons(token, true)],
                flags: None,
            }),
        }
    }

    /// Reply only to the pressing user, leaving the message untouched.
    fn ephemeral(content: String) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content,
                components: Vec::new(),
                flags: Some(FLAG_EPHEMERAL),
            }),
        }
    }
}

/// Split a button custom id of the form `approve:<token>` / `deny:<token>`.
pub fn parse_custom_id(custom_id: &str) -> Option<(Decision, &str)> {
    let (action, token) = custom_id.split_once(':')?;
    if token.is_empty() {
        return None;
    }
    Some((Decision::from_action(action)?, token))
}

// =============================================================================
// Handler
// =============================================================================

/// Interaction webhook endpoint.
///
/// This endpoint:
/// 1. Verifies the Ed25519 signature over timestamp + raw body
/// 2. Answers PING probes with PONG
/// 3. Records approve/deny button presses on the token row
pub async fn interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Reject everything when no public key is configured
    if !is_signature_verification_enabled(&state.config.discord_public_key) {
        warn!("interactions_public_key_not_configured");
        return (
            StatusCode::UNAUTHORIZED,
            Json(InteractionResponse::ephemeral("unauthorized".to_string())),
        );
    }

    let public_key = state.config.discord_public_key.as_deref().unwrap_or("");
    let signature = header_str(&headers, "X-Signature-Ed25519");
    let timestamp = header_str(&headers, "X-Signature-Timestamp");

    if !verify_interaction_signature(public_key, timestamp, &body, signature) {
        warn!(body_length = body.len(), "interaction_signature_invalid");
        return (
            StatusCode::UNAUTHORIZED,
            Json(InteractionResponse::ephemeral("unauthorized".to_string())),
        );
    }

    // Parse only after the signature checked out
    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "interaction_parse_failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(InteractionResponse::ephemeral("bad request".to_string())),
            );
        }
    };

    match interaction.kind {
        INTERACTION_PING => {
            info!("interaction_ping");
            (StatusCode::OK, Json(InteractionResponse::pong()))
        }
        INTERACTION_MESSAGE_COMPONENT => {
            let custom_id = interaction
                .data
                .as_ref()
                .and_then(|d| d.custom_id.as_deref())
                .unwrap_or("");

            match parse_custom_id(custom_id) {
                Some((decision, token)) => handle_decision(&state, decision, token).await,
                None => {
                    warn!("interaction_unknown_custom_id");
                    (
                        StatusCode::BAD_REQUEST,
                        Json(InteractionResponse::ephemeral("bad request".to_string())),
                    )
                }
            }
        }
        other => {
            warn!(interaction_type = other, "interaction_unsupported_type");
            (
                StatusCode::BAD_REQUEST,
                Json(InteractionResponse::ephemeral("bad request".to_string())),
            )
        }
    }
}

/// Record a reviewer decision and build the interaction response.
async fn handle_decision(
    state: &AppState,
    decision: Decision,
    token: &str,
) -> (StatusCode, Json<InteractionResponse>) {
    let row = match state.store.find(token).await {
        Ok(row) => row,
        Err(StoreError::NotFound) => {
            warn!("interaction_unknown_token");
            return (
                StatusCode::OK,
                Json(InteractionResponse::ephemeral(
                    "Unknown submission.".to_string(),
                )),
            );
        }
        Err(e) => {
            error!(error = %e, "interaction_store_lookup_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InteractionResponse::ephemeral(
                    "Internal error, try again.".to_string(),
                )),
            );
        }
    };

    if let Err(rejection) = row.admit_decision() {
        info!(
            token_prefix = row.token_prefix(),
            rejection = ?rejection,
            "interaction_decision_rejected"
        );
        return (
            StatusCode::OK,
            Json(InteractionResponse::ephemeral(already_settled_text(&row))),
        );
    }

    match state.store.record_decision(token, decision).await {
        Ok(true) => {
            info!(
                token_prefix = row.token_prefix(),
                decision = decision.as_str(),
                "decision_recorded"
            );
            (
                StatusCode::OK,
                Json(InteractionResponse::update_message(
                    format!(
                        "Submission `{}…` **{}**.",
                        row.token_prefix(),
                        decision.as_str()
                    ),
                    token,
                )),
            )
        }
        // Lost the race: someone else decided between lookup and update
        Ok(false) => (
            StatusCode::OK,
            Json(InteractionResponse::ephemeral(
                "This submission was already decided.".to_string(),
            )),
        ),
        Err(e) => {
            error!(error = %e, "interaction_store_update_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InteractionResponse::ephemeral(
                    "Internal error, try again.".to_string(),
                )),
            )
        }
    }
}

fn already_settled_text(row: &TokenRow) -> String {
    match row.decision.as_deref() {
        Some(decision) => format!("Already {}.", decision),
        None => "Nothing was submitted for this token.".to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_custom_id_approve() {
        let (decision, token) = parse_custom_id("approve:abc123").unwrap();
        assert_eq!(decision, Decision::Approved);
        assert_eq!(token, "abc123");
    }

    #[test]
    fn test_parse_custom_id_deny() {
        let (decision, token) = parse_custom_id("deny:ff00").unwrap();
        assert_eq!(decision, Decision::Denied);
        assert_eq!(token, "ff00");
    }

    #[test]
    fn test_parse_custom_id_rejects_garbage() {
        assert!(parse_custom_id("approve").is_none());
        assert!(parse_custom_id("approve:").is_none());
        assert!(parse_custom_id("escalate:abc").is_none());
        assert!(parse_custom_id("").is_none());
    }

    #[test]
    fn test_parse_custom_id_token_may_contain_colon() {
        // Only the first colon splits action from token
        let (_, token) = parse_custom_id("deny:a:b").unwrap();
        assert_eq!(token, "a:b");
    }

    #[test]
    fn test_pong_serialization() {
        let json = serde_json::to_value(InteractionResponse::pong()).unwrap();
        assert_eq!(json["type"], 1);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_update_message_disables_buttons() {
        let response = InteractionResponse::update_message("done".to_string(), "tok");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], 7);
        assert_eq!(json["data"]["content"], "done");
        assert_eq!(
            json["data"]["components"][0]["components"][0]["disabled"],
            true
        );
    }

    #[test]
    fn test_ephemeral_flag() {
        let response = InteractionResponse::ephemeral("oops".to_string());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["type"], 4);
        assert_eq!(json["data"]["flags"], 64);
        assert!(json["data"].get("components").is_none());
    }

    #[test]
    fn test_interaction_deserialization() {
        let interaction: Interaction = serde_json::from_str(
            r#"{"type":3,"data":{"custom_id":"approve:abc","component_type":2}}"#,
        )
        .unwrap();

        assert_eq!(interaction.kind, 3);
        assert_eq!(
            interaction.data.unwrap().custom_id.as_deref(),
            Some("approve:abc")
        );
    }

    #[test]
    fn test_ping_deserialization() {
        let interaction: Interaction = serde_json::from_str(r#"{"type":1}"#).unwrap();
        assert_eq!(interaction.kind, 1);
        assert!(interaction.data.is_none());
    }
}
