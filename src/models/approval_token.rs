use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

/// Single-use credential embedded in the approve/reject links of the
/// administrator email. One per certification request.
#[derive(Clone, FromRow)]
pub struct ApprovalToken {
    pub request_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Outcome of checking a supplied token against the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Valid,
    /// No token was ever issued for the request
    Missing,
    /// The supplied string does not match the stored token
    Mismatch,
    /// Correct token, already consumed
    Spent,
    /// Correct token, older than the validity window
    Expired,
    /// The store could not be read
    Unavailable,
}

impl TokenCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenCheck::Valid)
    }

    /// The caller proved possession of the right token, even if it can no longer be used
    pub fn proves_possession(&self) -> bool {
        matches!(self, TokenCheck::Valid | TokenCheck::Spent | TokenCheck::Expired)
    }
}

impl std::fmt::Debug for ApprovalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalToken")
            .field("request_id", &self.request_id)
            .field("token", &"[redacted]")
            .field("created_at", &self.created_at)
            .field("used", &self.used)
            .field("used_at", &self.used_at)
            .finish()
    }
}

impl ApprovalToken {
    pub fn new(request_id: &str, token: String, now: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.to_string(),
            token,
            created_at: now,
            used: false,
            used_at: None,
        }
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at + ttl
    }

    /// The window is inclusive: a token checked exactly at `created_at + ttl` is still live
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now > self.expires_at(ttl)
    }

    /// Constant-time comparison against the stored token
    pub fn matches(&self, supplied: &str) -> bool {
        #[allow(deprecated)]
        ring::constant_time::verify_slices_are_equal(self.token.as_bytes(), supplied.as_bytes())
            .is_ok()
    }

    pub fn check(&self, supplied: &str, ttl: Duration, now: DateTime<Utc>) -> TokenCheck {
        if !self.matches(supplied) {
            return TokenCheck::Mismatch;
        }
        if self.used {
            return TokenCheck::Spent;
        }
        if self.is_expired(ttl, now) {
            return TokenCheck::Expired;
        }
        TokenCheck::Valid
    }

    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        if !self.used {
            self.used = true;
            self.used_at = Some(at);
        }
    }
}
