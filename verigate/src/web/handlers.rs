//! Upload and issuance endpoint handlers.
//!
//! The upload handler is the consolidated five-step pipeline that the old
//! per-deployment handlers all reimplemented:
//! 1. Parse the multipart upload
//! 2. Look up the token row
//! 3. Run the lifecycle gate (expiry, used, submitted)
//! 4. Relay the file to the row's webhook
//! 5. Mark the row submitted

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use crate::relay::{SubmissionFile, WebhookRelay};
use crate::store::{GateRejection, StoreError, TokenStore, TOKEN_PREFIX_LEN};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: TokenStore,
    pub relay: WebhookRelay,
}

impl AppState {
    pub fn new(config: Config, store: TokenStore, relay: WebhookRelay) -> Self {
        Self {
            config: Arc::new(config),
            store,
            relay,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Upload
// =============================================================================

/// Upload endpoint response.
#[derive(Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UploadResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    fn detail(status: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

/// Fields collected from the upload form.
struct UploadForm {
    token: String,
    file: SubmissionFile,
}

/// Upload form endpoint.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> impl IntoResponse {
    let form = match read_upload_form(multipart, state.config.upload_max_bytes).await {
        Ok(form) => form,
        Err(rejection) => return rejection,
    };

    let token_prefix: String = form.token.chars().take(TOKEN_PREFIX_LEN).collect();

    info!(
        token_prefix = %token_prefix,
        file_name = %form.file.file_name,
        file_size = form.file.bytes.len(),
        "upload_received"
    );

    // Look up the token row
    let row = match state.store.find(&form.token).await {
        Ok(row) => row,
        Err(StoreError::NotFound) => {
            warn!(token_prefix = %token_prefix, "upload_unknown_token");
            return (
                StatusCode::NOT_FOUND,
                Json(UploadResponse::status("unknown_token")),
            );
        }
        Err(e) => {
            error!(error = %e, "upload_store_lookup_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadResponse::status("error")),
            );
        }
    };

    // Lifecycle gate
    if let Err(rejection) = row.admit_upload(Utc::now()) {
        let (code, status) = match rejection {
            GateRejection::Expired => (StatusCode::GONE, "expired"),
            GateRejection::AlreadySubmitted => (StatusCode::CONFLICT, "already_submitted"),
            _ => (StatusCode::CONFLICT, "already_used"),
        };
        warn!(
            token_prefix = row.token_prefix(),
            rejection = ?rejection,
            "upload_gate_rejected"
        );
        return (code, Json(UploadResponse::status(status)));
    }

    // Relay before touching the row: a failed relay must leave it reusable
    if let Err(e) = state
        .relay
        .relay_submission(&row.webhook_url, &row.token, row.token_prefix(), &form.file)
        .await
    {
        error!(
            token_prefix = row.token_prefix(),
            error = %e,
            "upload_relay_failed"
        );
        return (
            StatusCode::BAD_GATEWAY,
            Json(UploadResponse::status("relay_failed")),
        );
    }

    // Consume the token; a lost race means someone else's relay won
    match state.store.mark_submitted(&form.token).await {
        Ok(true) => {
            info!(token_prefix = row.token_prefix(), "upload_submitted");
            (StatusCode::OK, Json(UploadResponse::status("submitted")))
        }
        Ok(false) => {
            warn!(token_prefix = row.token_prefix(), "upload_lost_race");
            (
                StatusCode::CONFLICT,
                Json(UploadResponse::status("already_used")),
            )
        }
        Err(e) => {
            // The file already reached the channel; report but do not retry
            error!(
                token_prefix = row.token_prefix(),
                error = %e,
                "upload_mark_submitted_failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadResponse::status("error")),
            )
        }
    }
}

/// Read the `token` and `file` parts out of the multipart form.
async fn read_upload_form(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<UploadForm, (StatusCode, Json<UploadResponse>)> {
    let mut token: Option<String> = None;
    let mut file: Option<SubmissionFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "upload_multipart_malformed");
                return Err(multipart_failure(e.status()));
            }
        };

        // Own the metadata before consuming the field body
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "token" => match field.text().await {
                Ok(text) => token = Some(text.trim().to_string()),
                Err(e) => {
                    warn!(error = %e, "upload_token_field_unreadable");
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(UploadResponse::detail("bad_request", "unreadable token field")),
                    ));
                }
            },
            "file" => {
                let file_name = field
                    .file_name()
                    .unwrap_or("upload.bin")
                    .to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();

                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "upload_file_field_unreadable");
                        return Err(multipart_failure(e.status()));
                    }
                };

                if bytes.len() > max_bytes {
                    warn!(
                        file_size = bytes.len(),
                        max_bytes = max_bytes,
                        "upload_file_too_large"
                    );
                    return Err((
                        StatusCode::PAYLOAD_TOO_LARGE,
                        Json(UploadResponse::status("too_large")),
                    ));
                }

                file = Some(SubmissionFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            // Ignore unrecognized fields so form tweaks stay compatible
            _ => {}
        }
    }

    match (token, file) {
        (Some(token), Some(file)) if !token.is_empty() => Ok(UploadForm { token, file }),
        (Some(_), Some(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::detail("bad_request", "empty token field")),
        )),
        (None, _) => Err((
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::detail("bad_request", "missing token field")),
        )),
        (_, None) => Err((
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::detail("bad_request", "missing file field")),
        )),
    }
}

/// Map a multipart read failure to a response.
///
/// Only the body-limit rejection means the upload was too large; every
/// other stream failure is a malformed request.
fn multipart_failure(status: StatusCode) -> (StatusCode, Json<UploadResponse>) {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(UploadResponse::status("too_large")),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(UploadResponse::detail("bad_request", "malformed multipart body")),
        )
    }
}

// =============================================================================
// Token Issuance
// =============================================================================

/// Issuance request body.
#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub webhook_url: String,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

/// Issuance response.
#[derive(Serialize)]
pub struct IssueResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssueResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            token: None,
            expires_at: None,
        }
    }
}

/// Token issuance endpoint.
///
/// Guarded by the `X-Api-Key` header; refuses all requests when no key is
/// configured.
pub async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IssueRequest>,
) -> impl IntoResponse {
    let expected_key = match state.config.issue_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => key,
        _ => {
            warn!("issue_api_key_not_configured");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(IssueResponse::status("issuance_disabled")),
            );
        }
    };

    let provided = headers
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided != expected_key {
        warn!(has_key = !provided.is_empty(), "issue_auth_invalid");
        return (
            StatusCode::UNAUTHORIZED,
            Json(IssueResponse::status("unauthorized")),
        );
    }

    if !is_valid_webhook_url(&request.webhook_url) {
        warn!("issue_invalid_webhook_url");
        return (
            StatusCode::BAD_REQUEST,
            Json(IssueResponse::status("invalid_webhook_url")),
        );
    }

    let ttl_seconds = request
        .ttl_seconds
        .filter(|&ttl| ttl > 0)
        .unwrap_or(state.config.token_ttl_seconds);

    match state.store.create(&request.webhook_url, ttl_seconds).await {
        Ok(row) => {
            info!(
                token_prefix = row.token_prefix(),
                expires_at = %row.expires_at,
                "issue_token_created"
            );
            (
                StatusCode::CREATED,
                Json(IssueResponse {
                    status: "created",
                    token: Some(row.token),
                    expires_at: Some(row.expires_at),
                }),
            )
        }
        Err(e) => {
            error!(error = %e, "issue_store_create_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(IssueResponse::status("error")),
            )
        }
    }
}

/// Webhook URLs must be absolute https URLs with a host.
fn is_valid_webhook_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => url.scheme() == "https" && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_webhook_url() {
        assert!(is_valid_webhook_url(
            "https://discord.com/api/webhooks/123/abc"
        ));
        assert!(!is_valid_webhook_url("http://discord.com/api/webhooks/1/x"));
        assert!(!is_valid_webhook_url("not a url"));
        assert!(!is_valid_webhook_url(""));
        assert!(!is_valid_webhook_url("https://"));
    }

    #[test]
    fn test_upload_response_serialization() {
        let json = serde_json::to_value(UploadResponse::status("submitted")).unwrap();
        assert_eq!(json["status"], "submitted");
        assert!(json.get("detail").is_none());

        let json =
            serde_json::to_value(UploadResponse::detail("bad_request", "missing token field"))
                .unwrap();
        assert_eq!(json["detail"], "missing token field");
    }

    #[test]
    fn test_multipart_failure_classification() {
        let (code, body) = multipart_failure(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(code, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body.0.status, "too_large");

        // Stream errors that are not the body limit are the client's fault
        let (code, body) = multipart_failure(StatusCode::BAD_REQUEST);
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.0.status, "bad_request");

        let (code, _) = multipart_failure(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_issue_request_deserialization() {
        let request: IssueRequest = serde_json::from_str(
            r#"{"webhook_url":"https://discord.com/api/webhooks/1/x","ttl_seconds":600}"#,
        )
        .unwrap();
        assert_eq!(request.ttl_seconds, Some(600));

        let request: IssueRequest =
            serde_json::from_str(r#"{"webhook_url":"https://discord.com/api/webhooks/1/x"}"#)
                .unwrap();
        assert!(request.ttl_seconds.is_none());
    }
}
