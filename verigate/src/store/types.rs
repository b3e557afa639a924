//! Token row type and lifecycle gate.
//!
//! The gate is pure logic over an already-loaded row, so every admission
//! rule is unit-testable without a database. The database queries add their
//! own guards on top (WHERE used = FALSE etc.) so concurrent requests
//! cannot race past a stale read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of leading token characters safe to surface in logs and messages.
pub const TOKEN_PREFIX_LEN: usize = 8;

// =============================================================================
// Decision
// =============================================================================

/// Reviewer decision recorded on a submitted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    /// Stable string form, used for the database column and button ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Denied => "denied",
        }
    }

    /// Parse the action verb used in button custom ids.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "approve" => Some(Decision::Approved),
            "deny" => Some(Decision::Denied),
            _ => None,
        }
    }
}

// =============================================================================
// Token Row
// =============================================================================

/// A single verification token row as stored in Postgres.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenRow {
    /// Opaque hex token handed to the uploader
    pub token: String,
    /// Chat-platform webhook URL the upload is relayed to
    pub webhook_url: String,
    /// Moment after which an unsubmitted token is dead
    pub expires_at: DateTime<Utc>,
    /// Whether the token has been consumed (by submission or expiry sweep)
    pub used: bool,
    /// Whether a file was successfully relayed for this token
    pub submitted: bool,
    /// Reviewer decision, if one has been recorded
    pub decision: Option<String>,
    /// Issuance time
    pub created_at: DateTime<Utc>,
    /// When the decision was recorded
    pub decided_at: Option<DateTime<Utc>>,
}

/// Reason the lifecycle gate refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// Token expired before submission
    Expired,
    /// Token already consumed
    AlreadyUsed,
    /// A file was already relayed for this token
    AlreadySubmitted,
    /// Decision requested but nothing was submitted yet
    NotSubmitted,
    /// A decision has already been recorded
    AlreadyDecided,
}

impl TokenRow {
    /// Check whether this row admits a file submission at `now`.
    ///
    /// Order matters: expiry is reported before the used/submitted flags so
    /// an expired-and-swept token reads as expired, not as consumed.
    pub fn admit_upload(&self, now: DateTime<Utc>) -> Result<(), GateRejection> {
        if now >= self.expires_at {
            return Err(GateRejection::Expired);
        }
        if self.submitted {
            return Err(GateRejection::AlreadySubmitted);
        }
        if self.used {
            return Err(GateRejection::AlreadyUsed);
        }
        Ok(())
    }

    /// Check whether this row admits a reviewer decision.
    ///
    /// Expiry is deliberately not consulted: once a file is submitted the
    /// review may finish after `expires_at`.
    pub fn admit_decision(&self) -> Result<(), GateRejection> {
        if !self.submitted {
            return Err(GateRejection::NotSubmitted);
        }
        if self.decision.is_some() {
            return Err(GateRejection::AlreadyDecided);
        }
        Ok(())
    }

    /// Leading characters of the token, safe for logs and relayed messages.
    pub fn token_prefix(&self) -> &str {
        &self.token[..self.token.len().min(TOKEN_PREFIX_LEN)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(expires_in: i64, used: bool, submitted: bool, decision: Option<&str>) -> TokenRow {
        let now = Utc::now();
        TokenRow {
            token: "abcdef0123456789".to_string(),
            webhook_url: "https://discord.com/api/webhooks/1/x".to_string(),
            expires_at: now + Duration::seconds(expires_in),
            used,
            submitted,
            decision: decision.map(|s| s.to_string()),
            created_at: now,
            decided_at: None,
        }
    }

    #[test]
    fn test_admit_upload_fresh_token() {
        assert_eq!(row(3600, false, false, None).admit_upload(Utc::now()), Ok(()));
    }

    #[test]
    fn test_admit_upload_expired() {
        let r = row(-5, false, false, None);
        assert_eq!(r.admit_upload(Utc::now()), Err(GateRejection::Expired));
    }

    #[test]
    fn test_admit_upload_expired_wins_over_used() {
        // A swept token is both used and expired; expiry must be reported.
        let r = row(-5, true, false, None);
        assert_eq!(r.admit_upload(Utc::now()), Err(GateRejection::Expired));
    }

    #[test]
    fn test_admit_upload_already_submitted() {
        let r = row(3600, true, true, None);
        assert_eq!(
            r.admit_upload(Utc::now()),
            Err(GateRejection::AlreadySubmitted)
        );
    }

    #[test]
    fn test_admit_upload_used_but_not_submitted() {
        let r = row(3600, true, false, None);
        assert_eq!(r.admit_upload(Utc::now()), Err(GateRejection::AlreadyUsed));
    }

    #[test]
    fn test_admit_decision_requires_submission() {
        let r = row(3600, false, false, None);
        assert_eq!(r.admit_decision(), Err(GateRejection::NotSubmitted));
    }

    #[test]
    fn test_admit_decision_once() {
        let r = row(3600, true, true, Some("approved"));
        assert_eq!(r.admit_decision(), Err(GateRejection::AlreadyDecided));
    }

    #[test]
    fn test_admit_decision_after_expiry() {
        // Submission happened in time; the review may finish later.
        let r = row(-5, true, true, None);
        assert_eq!(r.admit_decision(), Ok(()));
    }

    #[test]
    fn test_token_prefix() {
        let r = row(3600, false, false, None);
        assert_eq!(r.token_prefix(), "abcdef01");
    }

    #[test]
    fn test_token_prefix_short_token() {
        let mut r = row(3600, false, false, None);
        r.token = "abc".to_string();
        assert_eq!(r.token_prefix(), "abc");
    }

    #[test]
    fn test_decision_from_action() {
        assert_eq!(Decision::from_action("approve"), Some(Decision::Approved));
        assert_eq!(Decision::from_action("deny"), Some(Decision::Denied));
        assert_eq!(Decision::from_action("shrug"), None);
    }

    #[test]
    fn test_decision_as_str() {
        assert_eq!(Decision::Approved.as_str(), "approved");
        assert_eq!(Decision::Denied.as_str(), "denied");
    }
}
