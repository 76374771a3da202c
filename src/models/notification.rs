use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::FromRow;
use uuid::Uuid;

use super::certification::{CertificationRequest, CertificationStatus};

/// In-app notification shown to the user after their request was decided
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String, // "certification_approved" or "certification_rejected"
    pub title: String,
    pub message: String,
    pub read: bool,
    pub action_type: String, // "view_profile" or "retry_certification"
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Builds the notification for a decided request. Pending requests get none.
    pub fn for_decision(request: &CertificationRequest, now: DateTime<Utc>) -> Option<Self> {
        let (kind, title, message, action_type) = match request.status {
            CertificationStatus::Pending => return None,
            CertificationStatus::Approved => (
                "certification_approved",
                "Certification approved!",
                "Congratulations! Your spiritual certification has been approved. \
                 The badge is now visible on your profile."
                    .to_string(),
                "view_profile",
            ),
            CertificationStatus::Rejected => (
                "certification_rejected",
                "Certification not approved",
                format!(
                    "Your certification request was not approved. Reason: {}",
                    request.rejection_reason.as_deref().unwrap_or("Not specified")
                ),
                "retry_certification",
            ),
        };

        Some(Self {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            kind: kind.to_string(),
            title: title.to_string(),
            message,
            read: false,
            action_type: action_type.to_string(),
            metadata: json!({
                "certificationStatus": request.status,
                "rejectionReason": request.rejection_reason,
            }),
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certification::{sample_request, Actor, Decision};

    #[test]
    fn test_pending_request_has_no_notification() {
        assert!(Notification::for_decision(&sample_request("r1"), Utc::now()).is_none());
    }

    #[test]
    fn test_rejection_notification_carries_reason() {
        let rejected = sample_request("r1")
            .transition(
                &Decision::reject("missing receipt").unwrap(),
                &Actor::email_link(),
                Utc::now(),
            )
            .unwrap();

        let notification = Notification::for_decision(&rejected, Utc::now()).unwrap();

        assert_eq!(notification.kind, "certification_rejected");
        assert_eq!(notification.action_type, "retry_certification");
        assert!(notification.message.contains("missing receipt"));
        assert!(!notification.read);
        assert_eq!(notification.metadata["rejectionReason"], "missing receipt");
        assert_eq!(notification.metadata["certificationStatus"], "rejected");
    }

    #[test]
    fn test_approval_notification_serializes_type_field() {
        let approved = sample_request("r1")
            .transition(&Decision::Approve, &Actor::email_link(), Utc::now())
            .unwrap();

        let notification = Notification::for_decision(&approved, Utc::now()).unwrap();
        let json = serde_json::to_value(&notification).unwrap();

        assert_eq!(json["type"], "certification_approved");
        assert_eq!(json["actionType"], "view_profile");
        assert_eq!(json["userId"], "user-r1");
    }
}
