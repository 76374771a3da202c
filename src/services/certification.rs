use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::db::{CertificationStore, CommitOutcome, StoreError, TokenGuard};
use crate::error::{AppError, Result};
use crate::models::{
    Actor, CertificationRequest, CertificationStatus, Decision, NewCertificationRequest,
    TokenCheck,
};
use crate::services::events::{CertificationEvent, EventBus, StatusChange};
use crate::services::token_store::TokenStore;

/// Result of a transition attempt that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The request moved out of `pending` in this call
    Processed(CertificationRequest),
    /// Someone got there first; nothing was changed
    AlreadyProcessed { status: CertificationStatus },
}

/// What a valid link holder sees before deciding
#[derive(Debug, Clone, PartialEq)]
pub enum Inspection {
    Pending(CertificationRequest),
    AlreadyProcessed { status: CertificationStatus },
}

fn request_not_found() -> AppError {
    AppError::NotFound("The certification request was not found.".to_string())
}

/// The certification workflow: submission, token-gated decisions and the
/// admin panel path. Committed transitions are published on the event bus.
#[derive(Clone)]
pub struct CertificationService {
    store: Arc<dyn CertificationStore>,
    tokens: TokenStore,
    events: EventBus,
}

impl CertificationService {
    pub fn new(
        store: Arc<dyn CertificationStore>,
        events: EventBus,
        config: &WorkflowConfig,
    ) -> Self {
        let tokens = TokenStore::new(store.clone(), config.token_ttl);
        Self {
            store,
            tokens,
            events,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Stores a new pending request and issues its approval token
    #[tracing::instrument(skip(self, data), fields(user_id = %data.user_id))]
    pub async fn submit(&self, data: NewCertificationRequest) -> Result<CertificationRequest> {
        if data.user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        if data.user_email.trim().is_empty() {
            return Err(AppError::Validation("userEmail is required".to_string()));
        }

        let request_id = Uuid::new_v4().to_string();
        let request = CertificationRequest::new(request_id, data, Utc::now());

        let token = self.tokens.mint(&request.request_id)?;

        // The request and its token are stored together or not at all
        self.store
            .insert_submission(&request, &token)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(id) => {
                    AppError::Conflict(format!("Request {} already exists", id))
                }
                other => other.into(),
            })?;

        tracing::info!(request_id = %request.request_id, "Certification request submitted");

        self.events.publish(CertificationEvent::Submitted {
            request: request.clone(),
            token: token.token,
        });

        Ok(request)
    }

    pub async fn find(&self, request_id: &str) -> Result<CertificationRequest> {
        self.store
            .find_request(request_id)
            .await?
            .ok_or_else(request_not_found)
    }

    /// Runs the token check and reports where the request stands, without mutating anything.
    ///
    /// A holder of the right token whose link is spent or expired still learns
    /// the final status of a processed request; every other token failure is
    /// the same opaque `Forbidden`.
    #[tracing::instrument(skip(self, token))]
    pub async fn inspect(&self, request_id: &str, token: &str) -> Result<Inspection> {
        let check = self.tokens.check(request_id, token).await;

        match check {
            TokenCheck::Valid => {
                let request = self.find(request_id).await?;
                if request.status.is_terminal() {
                    Ok(Inspection::AlreadyProcessed {
                        status: request.status,
                    })
                } else {
                    Ok(Inspection::Pending(request))
                }
            }
            TokenCheck::Spent | TokenCheck::Expired => {
                match self.store.find_request(request_id).await {
                    Ok(Some(request)) if request.status.is_terminal() => {
                        Ok(Inspection::AlreadyProcessed {
                            status: request.status,
                        })
                    }
                    Ok(_) => {
                        tracing::warn!(request_id = %request_id, ?check, "Token no longer usable");
                        Err(AppError::Forbidden)
                    }
                    Err(e) => {
                        tracing::error!(
                            request_id = %request_id,
                            error = %e,
                            "Failed to load request"
                        );
                        Err(AppError::Forbidden)
                    }
                }
            }
            TokenCheck::Missing | TokenCheck::Mismatch | TokenCheck::Unavailable => {
                tracing::warn!(request_id = %request_id, ?check, "Token rejected");
                Err(AppError::Forbidden)
            }
        }
    }

    /// Applies a decision made through an emailed link
    #[tracing::instrument(
        skip(self, token, decision),
        fields(target_status = %decision.target_status())
    )]
    pub async fn process(
        &self,
        request_id: &str,
        token: &str,
        decision: Decision,
    ) -> Result<ProcessOutcome> {
        if let Inspection::AlreadyProcessed { status } = self.inspect(request_id, token).await? {
            tracing::info!(request_id = %request_id, %status, "Request already processed");
            return Ok(ProcessOutcome::AlreadyProcessed { status });
        }

        let guard = self.tokens.guard(token);
        self.commit(request_id, &decision, &Actor::email_link(), Some(&guard))
            .await
    }

    /// Applies a decision made by an administrator in the panel.
    ///
    /// Any outstanding email token is consumed by the same transition.
    #[tracing::instrument(skip(self, decision), fields(target_status = %decision.target_status()))]
    pub async fn process_via_panel(
        &self,
        request_id: &str,
        decision: Decision,
        admin_id: &str,
    ) -> Result<ProcessOutcome> {
        if admin_id.trim().is_empty() {
            return Err(AppError::Validation("An administrator id is required".to_string()));
        }

        self.commit(request_id, &decision, &Actor::panel(admin_id.trim()), None)
            .await
    }

    async fn commit(
        &self,
        request_id: &str,
        decision: &Decision,
        actor: &Actor,
        guard: Option<&TokenGuard>,
    ) -> Result<ProcessOutcome> {
        let outcome = self
            .store
            .commit_transition(request_id, decision, actor, guard, Utc::now())
            .await?;

        match outcome {
            CommitOutcome::Committed { before, after } => {
                tracing::info!(
                    request_id = %request_id,
                    status = %after.status,
                    processed_by = %actor.name,
                    "Certification request processed"
                );
                self.events
                    .publish(CertificationEvent::StatusChanged(StatusChange {
                        before,
                        after: after.clone(),
                    }));
                Ok(ProcessOutcome::Processed(after))
            }
            CommitOutcome::AlreadyProcessed(status) => {
                tracing::info!(
                    request_id = %request_id,
                    %status,
                    "Lost race, request already processed"
                );
                Ok(ProcessOutcome::AlreadyProcessed { status })
            }
            CommitOutcome::TokenRejected(check) => {
                tracing::warn!(request_id = %request_id, ?check, "Token rejected at commit");
                Err(AppError::Forbidden)
            }
            CommitOutcome::NotFound => Err(request_not_found()),
        }
    }
}
