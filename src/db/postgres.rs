use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::store::{plan_transition, CertificationStore, CommitOutcome, StoreError, TokenGuard};
use crate::models::{
    Actor, ApprovalToken, AuditLogEntry, CertificationRequest, CertificationStatus, Decision,
    Notification,
};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

fn duplicate_or(error: sqlx::Error, request_id: &str) -> StoreError {
    if is_unique_violation(&error) {
        StoreError::Duplicate(request_id.to_string())
    } else {
        error.into()
    }
}

async fn insert_request_row<'e, E>(
    executor: E,
    request: &CertificationRequest,
) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO certification_requests (
            request_id, user_id, user_name, user_email,
            purchase_email, proof_file_url, status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&request.request_id)
    .bind(&request.user_id)
    .bind(&request.user_name)
    .bind(&request.user_email)
    .bind(&request.purchase_email)
    .bind(&request.proof_file_url)
    .bind(request.status)
    .bind(request.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl CertificationStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_request(&self, request: &CertificationRequest) -> Result<(), StoreError> {
        insert_request_row(&self.pool, request)
            .await
            .map_err(|e| duplicate_or(e, &request.request_id))
    }

    async fn insert_submission(
        &self,
        request: &CertificationRequest,
        token: &ApprovalToken,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        insert_request_row(&mut *tx, request)
            .await
            .map_err(|e| duplicate_or(e, &request.request_id))?;

        sqlx::query(
            r#"
            INSERT INTO approval_tokens (request_id, token, created_at, used)
            VALUES ($1, $2, $3, false)
            "#,
        )
        .bind(&token.request_id)
        .bind(&token.token)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or(e, &request.request_id))?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_request(
        &self,
        request_id: &str,
    ) -> Result<Option<CertificationRequest>, StoreError> {
        let request = sqlx::query_as::<_, CertificationRequest>(
            r#"
            SELECT * FROM certification_requests
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn insert_token(&self, token: &ApprovalToken) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO approval_tokens (request_id, token, created_at, used)
            VALUES ($1, $2, $3, false)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(&token.request_id)
        .bind(&token.token)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_token(&self, request_id: &str) -> Result<Option<ApprovalToken>, StoreError> {
        let token = sqlx::query_as::<_, ApprovalToken>(
            r#"
            SELECT request_id, token, created_at, used, used_at
            FROM approval_tokens
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn mark_token_used(
        &self,
        request_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tokens
            SET used = true, used_at = $2
            WHERE request_id = $1 AND used = false
            "#,
        )
        .bind(request_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_transition(
        &self,
        request_id: &str,
        decision: &Decision,
        actor: &Actor,
        guard: Option<&TokenGuard>,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock order is always request row, then token row
        let request = sqlx::query_as::<_, CertificationRequest>(
            r#"
            SELECT * FROM certification_requests
            WHERE request_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let token = sqlx::query_as::<_, ApprovalToken>(
            r#"
            SELECT request_id, token, created_at, used, used_at
            FROM approval_tokens
            WHERE request_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let planned = plan_transition(
            request.as_ref(),
            token.as_ref(),
            decision,
            actor,
            guard,
            at,
        );
        let next = match planned {
            Ok(next) => next,
            Err(outcome) => {
                tx.rollback().await?;
                return Ok(outcome);
            }
        };

        let updated = sqlx::query_as::<_, CertificationRequest>(
            r#"
            UPDATE certification_requests
            SET
                status = $2,
                processed_at = $3,
                processed_via = $4,
                approved_at = $5,
                approved_by = $6,
                rejected_at = $7,
                rejected_by = $8,
                rejection_reason = $9
            WHERE request_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(next.status)
        .bind(next.processed_at)
        .bind(next.processed_via)
        .bind(next.approved_at)
        .bind(&next.approved_by)
        .bind(next.rejected_at)
        .bind(&next.rejected_by)
        .bind(&next.rejection_reason)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE approval_tokens
            SET used = true, used_at = $2
            WHERE request_id = $1 AND used = false
            "#,
        )
        .bind(request_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CommitOutcome::Committed {
            before: CertificationStatus::Pending,
            after: updated,
        })
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, kind, title, message,
                read, action_type, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.read)
        .bind(&notification.action_type)
        .bind(&notification.metadata)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_profile_certified(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, spiritually_certified, certified_at)
            VALUES ($1, true, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET spiritually_certified = true, certified_at = EXCLUDED.certified_at
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO certification_audit_log (
                id, request_id, user_id, user_name, action, performed_by,
                processed_via, rejection_reason, metadata, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.request_id)
        .bind(&entry.user_id)
        .bind(&entry.user_name)
        .bind(&entry.action)
        .bind(&entry.performed_by)
        .bind(entry.processed_via)
        .bind(&entry.rejection_reason)
        .bind(&entry.metadata)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
