use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::store::{plan_transition, CertificationStore, CommitOutcome, StoreError, TokenGuard};
use crate::models::{
    Actor, ApprovalToken, AuditLogEntry, CertificationRequest, CertificationStatus, Decision,
    Notification, UserProfile,
};

#[derive(Default)]
struct State {
    requests: HashMap<String, CertificationRequest>,
    tokens: HashMap<String, ApprovalToken>,
    notifications: Vec<Notification>,
    profiles: HashMap<String, UserProfile>,
    audit_log: Vec<AuditLogEntry>,
}

/// Process-local store, used when no database is configured and in tests.
///
/// A single mutex guards all collections, so `commit_transition` is atomic
/// with respect to every other operation.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    pub async fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        let state = self.state.lock().await;
        state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn audit_entries_for(&self, request_id: &str) -> Vec<AuditLogEntry> {
        let state = self.state.lock().await;
        state
            .audit_log
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.state.lock().await.profiles.get(user_id).cloned()
    }
}

#[async_trait]
impl CertificationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn insert_request(&self, request: &CertificationRequest) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if state.requests.contains_key(&request.request_id) {
            return Err(StoreError::Duplicate(request.request_id.clone()));
        }
        state
            .requests
            .insert(request.request_id.clone(), request.clone());

        Ok(())
    }

    async fn insert_submission(
        &self,
        request: &CertificationRequest,
        token: &ApprovalToken,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if state.requests.contains_key(&request.request_id)
            || state.tokens.contains_key(&token.request_id)
        {
            return Err(StoreError::Duplicate(request.request_id.clone()));
        }
        state
            .requests
            .insert(request.request_id.clone(), request.clone());
        state
            .tokens
            .insert(token.request_id.clone(), token.clone());

        Ok(())
    }

    async fn find_request(
        &self,
        request_id: &str,
    ) -> Result<Option<CertificationRequest>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.requests.get(request_id).cloned())
    }

    async fn insert_token(&self, token: &ApprovalToken) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        if state.tokens.contains_key(&token.request_id) {
            return Ok(false);
        }
        state
            .tokens
            .insert(token.request_id.clone(), token.clone());

        Ok(true)
    }

    async fn find_token(&self, request_id: &str) -> Result<Option<ApprovalToken>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.tokens.get(request_id).cloned())
    }

    async fn mark_token_used(
        &self,
        request_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        match state.tokens.get_mut(request_id) {
            Some(token) if !token.used => {
                token.mark_used(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_transition(
        &self,
        request_id: &str,
        decision: &Decision,
        actor: &Actor,
        guard: Option<&TokenGuard>,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let next = match plan_transition(
            state.requests.get(request_id),
            state.tokens.get(request_id),
            decision,
            actor,
            guard,
            at,
        ) {
            Ok(next) => next,
            Err(outcome) => return Ok(outcome),
        };

        state.requests.insert(request_id.to_string(), next.clone());
        if let Some(token) = state.tokens.get_mut(request_id) {
            token.mark_used(at);
        }

        Ok(CommitOutcome::Committed {
            before: CertificationStatus::Pending,
            after: next,
        })
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.state
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn set_profile_certified(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let profile = state
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile {
                user_id: user_id.to_string(),
                spiritually_certified: false,
                certified_at: None,
            });
        profile.spiritually_certified = true;
        profile.certified_at = Some(at);

        Ok(())
    }

    async fn append_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.state.lock().await.audit_log.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certification::sample_request;
    use crate::models::TokenCheck;
    use chrono::Duration;
    use std::sync::Arc;

    async fn seeded(request_id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_request(&sample_request(request_id)).await.unwrap();
        store
            .insert_token(&ApprovalToken::new(request_id, "tok".to_string(), Utc::now()))
            .await
            .unwrap();
        store
    }

    fn guard(token: &str) -> TokenGuard {
        TokenGuard {
            token: token.to_string(),
            ttl: Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_second_token_insert_is_refused() {
        let store = seeded("r1").await;
        let again = ApprovalToken::new("r1", "other".to_string(), Utc::now());

        assert!(!store.insert_token(&again).await.unwrap());
        assert_eq!(store.find_token("r1").await.unwrap().unwrap().token, "tok");
    }

    #[tokio::test]
    async fn test_submission_stores_request_and_token_together() {
        let store = MemoryStore::new();
        let token = ApprovalToken::new("r1", "tok".to_string(), Utc::now());

        store
            .insert_submission(&sample_request("r1"), &token)
            .await
            .unwrap();

        assert!(store.find_request("r1").await.unwrap().is_some());
        assert_eq!(store.find_token("r1").await.unwrap().unwrap().token, "tok");
    }

    #[tokio::test]
    async fn test_submission_with_taken_token_stores_nothing() {
        let store = MemoryStore::new();
        let stale = ApprovalToken::new("r1", "stale".to_string(), Utc::now());
        store.insert_token(&stale).await.unwrap();

        let fresh = ApprovalToken::new("r1", "fresh".to_string(), Utc::now());
        let result = store.insert_submission(&sample_request("r1"), &fresh).await;

        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert!(store.find_request("r1").await.unwrap().is_none());
        assert_eq!(store.find_token("r1").await.unwrap().unwrap().token, "stale");
    }

    #[tokio::test]
    async fn test_commit_consumes_token() {
        let store = seeded("r1").await;

        let outcome = store
            .commit_transition(
                "r1",
                &Decision::Approve,
                &Actor::email_link(),
                Some(&guard("tok")),
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        assert!(store.find_token("r1").await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_commit_with_wrong_token_changes_nothing() {
        let store = seeded("r1").await;

        let outcome = store
            .commit_transition(
                "r1",
                &Decision::Approve,
                &Actor::email_link(),
                Some(&guard("nope")),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::TokenRejected(TokenCheck::Mismatch));
        let request = store.find_request("r1").await.unwrap().unwrap();
        assert_eq!(request.status, CertificationStatus::Pending);
        assert!(!store.find_token("r1").await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let store = MemoryStore::new();
        let outcome = store
            .commit_transition(
                "ghost",
                &Decision::Approve,
                &Actor::panel("admin"),
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_commits_only_one_wins() {
        let store = Arc::new(seeded("r1").await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let decision = if i % 2 == 0 {
                    Decision::Approve
                } else {
                    Decision::reject("duplicate").unwrap()
                };
                store
                    .commit_transition(
                        "r1",
                        &decision,
                        &Actor::email_link(),
                        Some(&guard("tok")),
                        Utc::now(),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CommitOutcome::Committed { .. }) {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = seeded("r1").await;
        store.set_unavailable(true);

        assert!(matches!(store.find_request("r1").await, Err(StoreError::Unavailable)));
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
