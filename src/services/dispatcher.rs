use chrono::Utc;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::WorkflowConfig;
use crate::db::CertificationStore;
use crate::models::{AuditLogEntry, CertificationRequest, CertificationStatus, Notification};
use crate::services::emails;
use crate::services::events::{CertificationEvent, StatusChange};
use crate::services::mailer::{Email, MailError, Mailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOutcome {
    #[default]
    Skipped,
    Done,
    Failed,
}

/// What happened to each side effect of one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub notification: StepOutcome,
    pub profile_flag: StepOutcome,
    pub user_email: StepOutcome,
    pub admin_email: StepOutcome,
    pub audit_entry: StepOutcome,
}

fn record<E: Display>(step: &'static str, request_id: &str, result: Result<(), E>) -> StepOutcome {
    match result {
        Ok(()) => {
            tracing::debug!(request_id = %request_id, step, "Side effect completed");
            StepOutcome::Done
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, step, error = %e, "Side effect failed");
            StepOutcome::Failed
        }
    }
}

/// Runs the side effects of certification events.
///
/// Every step is attempted regardless of the others, and a failing step is
/// only logged: the status change that triggered it is already committed.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn CertificationStore>,
    mailer: Arc<dyn Mailer>,
    config: WorkflowConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn CertificationStore>,
        mailer: Arc<dyn Mailer>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Consumes events until every sender is dropped
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<CertificationEvent>) {
        tracing::info!("Notification dispatcher started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::info!("Notification dispatcher stopped");
    }

    pub async fn handle(&self, event: CertificationEvent) -> DispatchReport {
        match event {
            CertificationEvent::Submitted { request, token } => {
                self.on_submitted(&request, &token).await
            }
            CertificationEvent::StatusChanged(change) => self.on_status_change(&change).await,
        }
    }

    #[tracing::instrument(skip(self, request, token), fields(request_id = %request.request_id))]
    async fn on_submitted(&self, request: &CertificationRequest, token: &str) -> DispatchReport {
        let email = emails::new_request_email(&self.config, request, token);
        let admin_email = record(
            "admin_request_email",
            &request.request_id,
            self.deliver(email.map(Some)).await,
        );

        DispatchReport {
            admin_email,
            ..DispatchReport::default()
        }
    }

    #[tracing::instrument(skip(self, change), fields(request_id = %change.after.request_id))]
    pub async fn on_status_change(&self, change: &StatusChange) -> DispatchReport {
        if !change.is_decision() {
            tracing::debug!(
                before = %change.before,
                after = %change.after.status,
                "Status change does not need processing"
            );
            return DispatchReport::default();
        }

        let request = &change.after;
        let request_id = request.request_id.as_str();
        let now = Utc::now();

        tracing::info!(status = %request.status, "Processing certification decision");

        let notification = match Notification::for_decision(request, now) {
            Some(notification) => record(
                "notification",
                request_id,
                self.store.insert_notification(&notification).await,
            ),
            None => StepOutcome::Skipped,
        };

        let profile_flag = if request.status == CertificationStatus::Approved {
            record(
                "profile_flag",
                request_id,
                self.store.set_profile_certified(&request.user_id, now).await,
            )
        } else {
            StepOutcome::Skipped
        };

        let user_email = record(
            "user_email",
            request_id,
            self.deliver(emails::user_decision_email(&self.config, request))
                .await,
        );

        let admin_email = record(
            "admin_confirmation_email",
            request_id,
            self.deliver(emails::admin_confirmation_email(&self.config, request))
                .await,
        );

        let audit_entry = match AuditLogEntry::for_decision(request, now) {
            Some(entry) => record(
                "audit_entry",
                request_id,
                self.store.append_audit_entry(&entry).await,
            ),
            None => StepOutcome::Skipped,
        };

        let report = DispatchReport {
            notification,
            profile_flag,
            user_email,
            admin_email,
            audit_entry,
        };
        tracing::info!(?report, "Certification decision processed");

        report
    }

    async fn deliver(&self, email: Result<Option<Email>, MailError>) -> Result<(), MailError> {
        match email? {
            Some(email) => self.mailer.send(&email).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::certification::sample_request;
    use crate::models::{Actor, Decision};
    use crate::services::mailer::testing::RecordingMailer;

    fn decided(decision: Decision) -> StatusChange {
        let after = sample_request("r1")
            .transition(&decision, &Actor::email_link(), Utc::now())
            .unwrap();
        StatusChange {
            before: CertificationStatus::Pending,
            after,
        }
    }

    fn dispatcher(
        store: Arc<MemoryStore>,
        mailer: Arc<RecordingMailer>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(store, mailer, WorkflowConfig::for_tests())
    }

    #[tokio::test]
    async fn test_approval_runs_every_step() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());

        let report = dispatcher(store.clone(), mailer.clone())
            .on_status_change(&decided(Decision::Approve))
            .await;

        assert_eq!(report.notification, StepOutcome::Done);
        assert_eq!(report.profile_flag, StepOutcome::Done);
        assert_eq!(report.user_email, StepOutcome::Done);
        assert_eq!(report.admin_email, StepOutcome::Done);
        assert_eq!(report.audit_entry, StepOutcome::Done);

        assert!(store.profile("user-r1").await.unwrap().spiritually_certified);
        assert_eq!(store.notifications_for("user-r1").await.len(), 1);
        assert_eq!(store.audit_entries_for("r1").await.len(), 1);
        assert_eq!(mailer.sent_to("maria@example.com").len(), 1);
        assert_eq!(mailer.sent_to("admin@example.com").len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_leaves_profile_alone() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());

        let report = dispatcher(store.clone(), mailer.clone())
            .on_status_change(&decided(Decision::reject("no proof").unwrap()))
            .await;

        assert_eq!(report.profile_flag, StepOutcome::Skipped);
        assert!(store.profile("user-r1").await.is_none());

        let entries = store.audit_entries_for("r1").await;
        assert_eq!(entries[0].action, "certification_rejected");
        assert_eq!(entries[0].rejection_reason.as_deref(), Some("no proof"));
        assert_eq!(entries[0].performed_by.as_deref(), Some("email_link"));
    }

    #[tokio::test]
    async fn test_mail_failure_does_not_stop_other_steps() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::failing());

        let report = dispatcher(store.clone(), mailer)
            .on_status_change(&decided(Decision::Approve))
            .await;

        assert_eq!(report.user_email, StepOutcome::Failed);
        assert_eq!(report.admin_email, StepOutcome::Failed);
        assert_eq!(report.notification, StepOutcome::Done);
        assert_eq!(report.profile_flag, StepOutcome::Done);
        assert_eq!(report.audit_entry, StepOutcome::Done);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_emails() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let mailer = Arc::new(RecordingMailer::default());

        let report = dispatcher(store, mailer.clone())
            .on_status_change(&decided(Decision::Approve))
            .await;

        assert_eq!(report.notification, StepOutcome::Failed);
        assert_eq!(report.profile_flag, StepOutcome::Failed);
        assert_eq!(report.audit_entry, StepOutcome::Failed);
        assert_eq!(report.user_email, StepOutcome::Done);
        assert_eq!(report.admin_email, StepOutcome::Done);
    }

    #[tokio::test]
    async fn test_non_decision_changes_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let mut change = decided(Decision::Approve);
        change.before = CertificationStatus::Approved;

        let report = dispatcher(store.clone(), mailer.clone())
            .on_status_change(&change)
            .await;

        assert_eq!(report, DispatchReport::default());
        assert!(store.notifications_for("user-r1").await.is_empty());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submission_emails_admin() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());

        let report = dispatcher(store, mailer.clone())
            .handle(CertificationEvent::Submitted {
                request: sample_request("r9"),
                token: "tok".to_string(),
            })
            .await;

        assert_eq!(report.admin_email, StepOutcome::Done);
        let sent = mailer.sent_to("admin@example.com");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("requestId=r9"));
    }
}
