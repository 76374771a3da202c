use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::error::{AppError, Result};

/// Actor recorded on transitions made through the emailed links
pub const EMAIL_LINK_ACTOR: &str = "email_link";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "certification_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CertificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl CertificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificationStatus::Pending => "pending",
            CertificationStatus::Approved => "approved",
            CertificationStatus::Rejected => "rejected",
        }
    }

    /// `approved` and `rejected` have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CertificationStatus::Pending)
    }
}

impl fmt::Display for CertificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "processing_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessedVia {
    Email,
    Panel,
}

impl ProcessedVia {
    pub fn describe(&self) -> &'static str {
        match self {
            ProcessedVia::Email => "via the email link",
            ProcessedVia::Panel => "via the admin panel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CertificationRequest {
    pub request_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub purchase_email: Option<String>,
    pub proof_file_url: Option<String>,
    pub status: CertificationStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub processed_via: Option<ProcessedVia>,
    pub approved_by: Option<String>,
    pub rejected_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCertificationRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email: String,
    pub purchase_email: Option<String>,
    pub proof_file_url: Option<String>,
}

/// What the administrator decided about a pending request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

impl Decision {
    /// Builds a rejection, trimming the reason. Blank reasons are refused.
    pub fn reject(reason: &str) -> Result<Self> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation(
                "A reason is required to reject a certification request".to_string(),
            ));
        }

        Ok(Decision::Reject {
            reason: reason.to_string(),
        })
    }

    pub fn target_status(&self) -> CertificationStatus {
        match self {
            Decision::Approve => CertificationStatus::Approved,
            Decision::Reject { .. } => CertificationStatus::Rejected,
        }
    }
}

/// Who performed a transition and through which channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub via: ProcessedVia,
}

impl Actor {
    pub fn email_link() -> Self {
        Self {
            name: EMAIL_LINK_ACTOR.to_string(),
            via: ProcessedVia::Email,
        }
    }

    pub fn panel(admin_id: &str) -> Self {
        Self {
            name: admin_id.to_string(),
            via: ProcessedVia::Panel,
        }
    }
}

/// Returned when a transition is attempted on a record that already left `pending`
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("certification request already {0}")]
pub struct AlreadyProcessed(pub CertificationStatus);

impl CertificationRequest {
    pub fn new(request_id: String, data: NewCertificationRequest, now: DateTime<Utc>) -> Self {
        Self {
            request_id,
            user_id: data.user_id,
            user_name: data.user_name,
            user_email: data.user_email,
            purchase_email: data.purchase_email,
            proof_file_url: data.proof_file_url,
            status: CertificationStatus::Pending,
            created_at: now,
            approved_at: None,
            rejected_at: None,
            processed_at: None,
            rejection_reason: None,
            processed_via: None,
            approved_by: None,
            rejected_by: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CertificationStatus::Pending
    }

    /// Applies `decision` to a pending record and returns the updated copy.
    ///
    /// Terminal records are left untouched and reported as [`AlreadyProcessed`].
    pub fn transition(
        &self,
        decision: &Decision,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> std::result::Result<Self, AlreadyProcessed> {
        if self.status.is_terminal() {
            return Err(AlreadyProcessed(self.status));
        }

        let mut next = self.clone();
        next.status = decision.target_status();
        next.processed_at = Some(at);
        next.processed_via = Some(actor.via);

        match decision {
            Decision::Approve => {
                next.approved_at = Some(at);
                next.approved_by = Some(actor.name.clone());
            }
            Decision::Reject { reason } => {
                next.rejected_at = Some(at);
                next.rejected_by = Some(actor.name.clone());
                next.rejection_reason = Some(reason.clone());
            }
        }

        Ok(next)
    }

    /// The actor that moved the record out of `pending`, if any
    pub fn processed_by(&self) -> Option<&str> {
        match self.status {
            CertificationStatus::Pending => None,
            CertificationStatus::Approved => self.approved_by.as_deref(),
            CertificationStatus::Rejected => self.rejected_by.as_deref(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.user_name.trim().is_empty() {
            "Not provided"
        } else {
            &self.user_name
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_request(request_id: &str) -> CertificationRequest {
    CertificationRequest::new(
        request_id.to_string(),
        NewCertificationRequest {
            user_id: format!("user-{}", request_id),
            user_name: "Maria Souza".to_string(),
            user_email: "maria@example.com".to_string(),
            purchase_email: Some("maria.compras@example.com".to_string()),
            proof_file_url: Some("https://files.example.com/proof.pdf".to_string()),
        },
        Utc::now(),
    )
}
