use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::FromRow;
use uuid::Uuid;

use super::certification::{CertificationRequest, CertificationStatus, ProcessedVia};

/// Append-only record of every decided certification request
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub request_id: String,
    pub user_id: String,
    pub user_name: String,
    pub action: String,
    pub performed_by: Option<String>,
    pub processed_via: Option<ProcessedVia>,
    pub rejection_reason: Option<String>,
    pub metadata: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn for_decision(request: &CertificationRequest, now: DateTime<Utc>) -> Option<Self> {
        let action = match request.status {
            CertificationStatus::Pending => return None,
            CertificationStatus::Approved => "certification_approved",
            CertificationStatus::Rejected => "certification_rejected",
        };

        Some(Self {
            id: Uuid::new_v4(),
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            user_name: request.user_name.clone(),
            action: action.to_string(),
            performed_by: request.processed_by().map(str::to_string),
            processed_via: request.processed_via,
            rejection_reason: request.rejection_reason.clone(),
            metadata: json!({ "status": request.status }),
            timestamp: now,
        })
    }
}
