// Models module - Stored entity representations

pub mod approval_token;
pub mod audit_log;
pub mod certification;
pub mod notification;
pub mod profile;

pub use approval_token::{ApprovalToken, TokenCheck};
pub use audit_log::AuditLogEntry;
pub use certification::{
    Actor, CertificationRequest, CertificationStatus, Decision, NewCertificationRequest,
    ProcessedVia,
};
pub use notification::Notification;
pub use profile::UserProfile;
