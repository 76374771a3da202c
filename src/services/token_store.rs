use chrono::{Duration, Utc};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

use crate::db::{CertificationStore, StoreError, TokenGuard};
use crate::error::{AppError, Result};
use crate::models::{ApprovalToken, TokenCheck};

const RANDOM_BYTES: usize = 32;

/// Generates an unguessable token for `request_id`.
///
/// Hex-encoded SHA-256 over the request id, 32 bytes from the system CSPRNG
/// and the current time in nanoseconds.
pub fn generate_token(request_id: &str) -> Result<String> {
    let rng = SystemRandom::new();
    let mut random = [0u8; RANDOM_BYTES];
    rng.fill(&mut random)
        .map_err(|_| anyhow::anyhow!("System random source unavailable"))?;

    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(request_id.as_bytes());
    ctx.update(&random);
    ctx.update(&nanos.to_be_bytes());

    Ok(hex::encode(ctx.finish().as_ref()))
}

/// Issues, checks and consumes approval tokens
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn CertificationStore>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(store: Arc<dyn CertificationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn guard(&self, token: &str) -> TokenGuard {
        TokenGuard {
            token: token.to_string(),
            ttl: self.ttl,
        }
    }

    /// Builds a fresh token record for a request without storing it
    pub fn mint(&self, request_id: &str) -> Result<ApprovalToken> {
        let token = generate_token(request_id)?;
        Ok(ApprovalToken::new(request_id, token, Utc::now()))
    }

    /// Creates the token for a request. Fails with a conflict if one was already issued.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, request_id: &str) -> Result<String> {
        let record = self.mint(request_id)?;
        let token = record.token.clone();

        if !self.store.insert_token(&record).await? {
            tracing::warn!(request_id = %request_id, "Approval token already issued");
            return Err(AppError::Conflict(format!(
                "An approval token already exists for request {}",
                request_id
            )));
        }

        tracing::info!(request_id = %request_id, "Approval token issued");
        Ok(token)
    }

    /// Detailed check. Storage failures come back as [`TokenCheck::Unavailable`].
    pub async fn check(&self, request_id: &str, token: &str) -> TokenCheck {
        match self.store.find_token(request_id).await {
            Ok(Some(record)) => record.check(token, self.ttl, Utc::now()),
            Ok(None) => TokenCheck::Missing,
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    "Failed to read approval token"
                );
                TokenCheck::Unavailable
            }
        }
    }

    /// True only for an existing, unused, unexpired token equal to `token`
    pub async fn validate(&self, request_id: &str, token: &str) -> bool {
        self.check(request_id, token).await.is_valid()
    }

    pub async fn mark_used(&self, request_id: &str) -> std::result::Result<bool, StoreError> {
        let marked = self.store.mark_token_used(request_id, Utc::now()).await?;
        if marked {
            tracing::info!(request_id = %request_id, "Approval token marked as used");
        }
        Ok(marked)
    }
}
