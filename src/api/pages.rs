use askama::Template;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::convert::Infallible;

use crate::error::AppError;
use crate::models::{CertificationRequest, CertificationStatus};
use crate::services::certification::ProcessOutcome;

/// Browsers get HTML pages; callers that prefer `application/json` get JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Html,
    Json,
}

impl ResponseFormat {
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(accept)
                if accept.contains("application/json") && !accept.contains("text/html") =>
            {
                ResponseFormat::Json
            }
            _ => ResponseFormat::Html,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ResponseFormat {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok());
        Ok(ResponseFormat::from_accept(accept))
    }
}

#[derive(Template)]
#[template(path = "pages/message.html")]
struct MessagePage {
    tone: &'static str, // "success", "info", "warning" or "error"
    title: String,
    message: String,
    details: Vec<String>,
}

#[derive(Template)]
#[template(path = "pages/rejection_form.html")]
pub struct RejectionFormPage {
    pub user_name: String,
    pub user_email: String,
    pub purchase_email: String,
    pub action: String,
}

impl RejectionFormPage {
    pub fn new(request: &CertificationRequest, token: &str) -> Self {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("requestId", &request.request_id)
            .append_pair("token", token)
            .finish();

        Self {
            user_name: request.display_name().to_string(),
            user_email: request.user_email.clone(),
            purchase_email: request
                .purchase_email
                .clone()
                .unwrap_or_else(|| "Not provided".to_string()),
            action: format!("processRejection?{}", query),
        }
    }
}

fn render(status: StatusCode, page: MessagePage) -> Response {
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

fn already_processed_message(status: CertificationStatus) -> String {
    format!("This request was already {} earlier.", status)
}

/// Error page (or JSON body) for a failed link request
pub fn error_response(error: AppError, format: ResponseFormat) -> Response {
    error.log();
    let status = error.status_code();

    match format {
        ResponseFormat::Json => (
            status,
            Json(json!({
                "error": error.code(),
                "message": error.public_message(),
            })),
        )
            .into_response(),
        ResponseFormat::Html => render(
            status,
            MessagePage {
                tone: "error",
                title: error.title().to_string(),
                message: error.public_message(),
                details: Vec::new(),
            },
        ),
    }
}

/// 200 informational response for a request that is no longer pending
pub fn already_processed_response(
    request_id: &str,
    status: CertificationStatus,
    format: ResponseFormat,
) -> Response {
    match format {
        ResponseFormat::Json => Json(json!({
            "requestId": request_id,
            "outcome": "already_processed",
            "status": status,
            "message": already_processed_message(status),
        }))
        .into_response(),
        ResponseFormat::Html => render(
            StatusCode::OK,
            MessagePage {
                tone: if status == CertificationStatus::Approved {
                    "success"
                } else {
                    "warning"
                },
                title: "Request already processed".to_string(),
                message: already_processed_message(status),
                details: Vec::new(),
            },
        ),
    }
}

/// Response for a finished approve/reject call
pub fn outcome_response(
    request_id: &str,
    outcome: ProcessOutcome,
    format: ResponseFormat,
) -> Response {
    let request = match outcome {
        ProcessOutcome::AlreadyProcessed { status } => {
            return already_processed_response(request_id, status, format)
        }
        ProcessOutcome::Processed(request) => request,
    };

    if format == ResponseFormat::Json {
        return Json(json!({
            "requestId": request.request_id,
            "outcome": "processed",
            "status": request.status,
            "rejectionReason": request.rejection_reason,
        }))
        .into_response();
    }

    let page = match request.status {
        CertificationStatus::Approved => MessagePage {
            tone: "success",
            title: "Certification approved".to_string(),
            message: format!(
                "The certification of {} was approved.",
                request.display_name()
            ),
            details: vec![
                "The user will receive a notification in the app".to_string(),
                "A confirmation email will be sent to the user".to_string(),
                "The certification badge will appear on the user's profile".to_string(),
            ],
        },
        _ => MessagePage {
            tone: "warning",
            title: "Certification rejected".to_string(),
            message: format!(
                "The certification of {} was rejected. Reason given: \"{}\"",
                request.display_name(),
                request.rejection_reason.as_deref().unwrap_or_default()
            ),
            details: vec![
                "The user will receive an in-app notification with the reason".to_string(),
                "An email explaining the decision will be sent to the user".to_string(),
                "The user can submit a new request after addressing the points raised"
                    .to_string(),
                "If the user needs deeper spiritual formation, \
                 consider recommending the mentorship program"
                    .to_string(),
            ],
        },
    };

    render(StatusCode::OK, page)
}
