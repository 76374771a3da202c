use askama::Template;
use chrono::{Datelike, Utc};
use url::Url;

use crate::config::WorkflowConfig;
use crate::models::{CertificationRequest, CertificationStatus};
use crate::services::mailer::{Email, MailError};

/// Approve/reject links embedded in the administrator email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLinks {
    pub approve: String,
    pub reject: String,
}

pub fn approval_links(
    base_url: &str,
    request_id: &str,
    token: &str,
) -> Result<ApprovalLinks, url::ParseError> {
    let base = Url::parse(base_url.trim_end_matches('/'))?;

    let link = |endpoint: &str| {
        let mut url = base.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), endpoint);
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair("requestId", request_id)
            .append_pair("token", token);
        url.to_string()
    };

    Ok(ApprovalLinks {
        approve: link("processApproval"),
        reject: link("processRejection"),
    })
}

/// Only absolute http(s) URLs are linked, anything else becomes `#`
fn safe_href(value: Option<&str>) -> String {
    value
        .and_then(|raw| Url::parse(raw.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|url| url.to_string())
        .unwrap_or_else(|| "#".to_string())
}

fn or_not_provided(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => "Not provided".to_string(),
    }
}

#[derive(Template)]
#[template(path = "emails/new_request.html")]
struct NewRequestEmail {
    request_id: String,
    user_name: String,
    user_email: String,
    purchase_email: String,
    submitted_at: String,
    proof_url: String,
    approve_url: String,
    reject_url: String,
    ttl_days: i64,
    year: i32,
}

#[derive(Template)]
#[template(path = "emails/user_decision.html")]
struct UserDecisionEmail {
    approved: bool,
    user_name: String,
    rejection_reason: String,
    year: i32,
}

#[derive(Template)]
#[template(path = "emails/admin_confirmation.html")]
struct AdminConfirmationEmail {
    approved: bool,
    user_name: String,
    user_email: String,
    processed_by: String,
    method: String,
    rejection_reason: String,
    console_url: String,
    year: i32,
}

/// Email asking the administrator to decide on a freshly submitted request
pub fn new_request_email(
    config: &WorkflowConfig,
    request: &CertificationRequest,
    token: &str,
) -> Result<Email, MailError> {
    let links = approval_links(&config.public_base_url, &request.request_id, token)?;

    let html = NewRequestEmail {
        request_id: request.request_id.clone(),
        user_name: request.display_name().to_string(),
        user_email: or_not_provided(Some(&request.user_email)),
        purchase_email: or_not_provided(request.purchase_email.as_deref()),
        submitted_at: request.created_at.format("%d/%m/%Y %H:%M UTC").to_string(),
        proof_url: safe_href(request.proof_file_url.as_deref()),
        approve_url: links.approve,
        reject_url: links.reject,
        ttl_days: config.token_ttl_days(),
        year: Utc::now().year(),
    }
    .render()?;

    Ok(Email {
        from: config.sender_address.clone(),
        to: config.admin_recipient.clone(),
        subject: "New spiritual certification request".to_string(),
        html,
    })
}

/// Email telling the user how their request was decided. None while pending.
pub fn user_decision_email(
    config: &WorkflowConfig,
    request: &CertificationRequest,
) -> Result<Option<Email>, MailError> {
    let approved = match request.status {
        CertificationStatus::Pending => return Ok(None),
        CertificationStatus::Approved => true,
        CertificationStatus::Rejected => false,
    };

    let html = UserDecisionEmail {
        approved,
        user_name: request.display_name().to_string(),
        rejection_reason: request.rejection_reason.clone().unwrap_or_default(),
        year: Utc::now().year(),
    }
    .render()?;

    let subject = if approved {
        "Your spiritual certification was approved!"
    } else {
        "Spiritual certification: review needed"
    };

    Ok(Some(Email {
        from: config.sender_address.clone(),
        to: request.user_email.clone(),
        subject: subject.to_string(),
        html,
    }))
}

/// Confirmation to the administrator after a request left `pending`
pub fn admin_confirmation_email(
    config: &WorkflowConfig,
    request: &CertificationRequest,
) -> Result<Option<Email>, MailError> {
    let approved = match request.status {
        CertificationStatus::Pending => return Ok(None),
        CertificationStatus::Approved => true,
        CertificationStatus::Rejected => false,
    };

    let html = AdminConfirmationEmail {
        approved,
        user_name: request.display_name().to_string(),
        user_email: request.user_email.clone(),
        processed_by: or_not_provided(request.processed_by()),
        method: request
            .processed_via
            .map(|via| via.describe().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        rejection_reason: request.rejection_reason.clone().unwrap_or_default(),
        console_url: config
            .admin_console_link(&request.request_id)
            .unwrap_or_default(),
        year: Utc::now().year(),
    }
    .render()?;

    let subject = if approved {
        "Certification approved - confirmation"
    } else {
        "Certification rejected - confirmation"
    };

    Ok(Some(Email {
        from: config.sender_address.clone(),
        to: config.admin_recipient.clone(),
        subject: subject.to_string(),
        html,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certification::sample_request;
    use crate::models::{Actor, Decision};

    #[test]
    fn test_links_carry_request_and_token() {
        let links = approval_links("https://fn.example.com/api/", "r 1", "abc").unwrap();

        assert_eq!(
            links.approve,
            "https://fn.example.com/api/processApproval?requestId=r+1&token=abc"
        );
        assert_eq!(
            links.reject,
            "https://fn.example.com/api/processRejection?requestId=r+1&token=abc"
        );
    }

    #[test]
    fn test_invalid_base_url_is_an_error() {
        assert!(approval_links("not a url", "r1", "t").is_err());
    }

    #[test]
    fn test_new_request_email_goes_to_admin_with_links() {
        let config = WorkflowConfig::for_tests();
        let email = new_request_email(&config, &sample_request("r1"), "tok123").unwrap();

        assert_eq!(email.to, "admin@example.com");
        assert_eq!(email.from, "noreply@example.com");
        assert!(email.html.contains("processApproval?requestId=r1&amp;token=tok123"));
        assert!(email.html.contains("maria.compras@example.com"));
        assert!(email.html.contains("7 days"));
    }

    #[test]
    fn test_proof_link_only_accepts_http() {
        assert_eq!(
            safe_href(Some("https://files.example.com/proof.pdf")),
            "https://files.example.com/proof.pdf"
        );
        assert_eq!(safe_href(Some("javascript:alert(document.cookie)")), "#");
        assert_eq!(safe_href(Some("data:text/html,<b>hi</b>")), "#");
        assert_eq!(safe_href(Some("not a url")), "#");
        assert_eq!(safe_href(None), "#");

        let mut request = sample_request("r1");
        request.proof_file_url = Some("javascript:alert(1)".to_string());
        let email = new_request_email(&WorkflowConfig::for_tests(), &request, "t").unwrap();
        assert!(!email.html.contains("javascript:"));
    }

    #[test]
    fn test_user_name_is_escaped() {
        let mut request = sample_request("r1");
        request.user_name = "<script>alert(1)</script>".to_string();

        let email = new_request_email(&WorkflowConfig::for_tests(), &request, "t").unwrap();
        assert!(!email.html.contains("<script>"));
    }

    #[test]
    fn test_rejection_emails_include_reason() {
        let config = WorkflowConfig::for_tests();
        let rejected = sample_request("r1")
            .transition(
                &Decision::reject("receipt is from another store").unwrap(),
                &Actor::email_link(),
                Utc::now(),
            )
            .unwrap();

        let user = user_decision_email(&config, &rejected).unwrap().unwrap();
        assert_eq!(user.to, "maria@example.com");
        assert!(user.html.contains("receipt is from another store"));

        let admin = admin_confirmation_email(&config, &rejected).unwrap().unwrap();
        assert_eq!(admin.to, "admin@example.com");
        assert!(admin.html.contains("receipt is from another store"));
        assert!(admin.html.contains("via the email link"));
        // askama escapes '/' inside attributes
        assert!(admin.html.contains("console.example.com"));
    }

    #[test]
    fn test_pending_request_has_no_decision_emails() {
        let config = WorkflowConfig::for_tests();
        let pending = sample_request("r1");

        assert!(user_decision_email(&config, &pending).unwrap().is_none());
        assert!(admin_confirmation_email(&config, &pending).unwrap().is_none());
    }
}
