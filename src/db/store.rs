use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::models::{
    Actor, ApprovalToken, AuditLogEntry, CertificationRequest, CertificationStatus, Decision,
    Notification, TokenCheck,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Store unavailable")]
    Unavailable,
}

/// Token the caller presented, re-checked inside the transition
#[derive(Clone)]
pub struct TokenGuard {
    pub token: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Status changed and the token (if any) was consumed
    Committed {
        before: CertificationStatus,
        after: CertificationRequest,
    },
    AlreadyProcessed(CertificationStatus),
    TokenRejected(TokenCheck),
    NotFound,
}

/// Persistence for certification requests and everything hanging off them.
///
/// `commit_transition` is the only way to move a request out of `pending`.
/// Implementations must run it as one atomic unit: re-read the request,
/// re-check the token, write the new status and consume the token, so that
/// two concurrent attempts can never both commit.
#[async_trait]
pub trait CertificationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_request(&self, request: &CertificationRequest) -> Result<(), StoreError>;

    /// Stores a new request together with its approval token, all or nothing.
    /// An existing request or token for the same id is a `Duplicate`.
    async fn insert_submission(
        &self,
        request: &CertificationRequest,
        token: &ApprovalToken,
    ) -> Result<(), StoreError>;

    async fn find_request(
        &self,
        request_id: &str,
    ) -> Result<Option<CertificationRequest>, StoreError>;

    /// Inserts the token unless one already exists for the request. Returns whether it was stored.
    async fn insert_token(&self, token: &ApprovalToken) -> Result<bool, StoreError>;

    async fn find_token(&self, request_id: &str) -> Result<Option<ApprovalToken>, StoreError>;

    /// Returns false when there was no unused token to mark
    async fn mark_token_used(&self, request_id: &str, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn commit_transition(
        &self,
        request_id: &str,
        decision: &Decision,
        actor: &Actor,
        guard: Option<&TokenGuard>,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    async fn set_profile_certified(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}

/// Shared precondition logic for `commit_transition`, once the request and
/// token rows are held.
pub(crate) fn plan_transition(
    request: Option<&CertificationRequest>,
    token: Option<&ApprovalToken>,
    decision: &Decision,
    actor: &Actor,
    guard: Option<&TokenGuard>,
    at: DateTime<Utc>,
) -> Result<CertificationRequest, CommitOutcome> {
    let request = request.ok_or(CommitOutcome::NotFound)?;

    if request.status.is_terminal() {
        return Err(CommitOutcome::AlreadyProcessed(request.status));
    }

    if let Some(guard) = guard {
        let check = match token {
            Some(token) => token.check(&guard.token, guard.ttl, at),
            None => TokenCheck::Missing,
        };
        if !check.is_valid() {
            return Err(CommitOutcome::TokenRejected(check));
        }
    }

    request
        .transition(decision, actor, at)
        .map_err(|already| CommitOutcome::AlreadyProcessed(already.0))
}
