use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Form, Router,
};
use serde::Deserialize;

use crate::api::pages::{
    already_processed_response, error_response, outcome_response, RejectionFormPage,
    ResponseFormat,
};
use crate::api::AppState;
use crate::error::AppError;
use crate::models::Decision;
use crate::services::certification::Inspection;

/// Query string of the emailed links
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkParams {
    pub request_id: Option<String>,
    pub token: Option<String>,
}

impl LinkParams {
    /// Both parameters must be present and non-blank. Values are returned as
    /// sent, the token has to match byte for byte.
    pub fn require(&self) -> Result<(&str, &str), AppError> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.trim().is_empty())
        }

        match (present(&self.request_id), present(&self.token)) {
            (Some(request_id), Some(token)) => Ok((request_id, token)),
            _ => Err(AppError::Validation(
                "Both requestId and token are required.".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectionForm {
    #[serde(default, rename = "rejectionReason")]
    pub rejection_reason: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/processApproval",
            get(process_approval).fallback(method_not_allowed),
        )
        .route(
            "/processRejection",
            get(rejection_form)
                .post(process_rejection)
                .fallback(method_not_allowed),
        )
}

/// GET /processApproval - approve through the emailed link
async fn process_approval(
    State(state): State<AppState>,
    format: ResponseFormat,
    Query(params): Query<LinkParams>,
) -> Response {
    let (request_id, token) = match params.require() {
        Ok(pair) => pair,
        Err(e) => return error_response(e, format),
    };

    match state
        .certifications
        .process(request_id, token, Decision::Approve)
        .await
    {
        Ok(outcome) => outcome_response(request_id, outcome, format),
        Err(e) => error_response(e, format),
    }
}

/// GET /processRejection - show the reason form, nothing is changed yet
async fn rejection_form(
    State(state): State<AppState>,
    format: ResponseFormat,
    Query(params): Query<LinkParams>,
) -> Response {
    let (request_id, token) = match params.require() {
        Ok(pair) => pair,
        Err(e) => return error_response(e, format),
    };

    match state.certifications.inspect(request_id, token).await {
        Ok(Inspection::Pending(request)) => {
            askama_axum::into_response(&RejectionFormPage::new(&request, token))
        }
        Ok(Inspection::AlreadyProcessed { status }) => {
            already_processed_response(request_id, status, format)
        }
        Err(e) => error_response(e, format),
    }
}

/// POST /processRejection - reject with the submitted reason
async fn process_rejection(
    State(state): State<AppState>,
    format: ResponseFormat,
    Query(params): Query<LinkParams>,
    form: Option<Form<RejectionForm>>,
) -> Response {
    let (request_id, token) = match params.require() {
        Ok(pair) => pair,
        Err(e) => return error_response(e, format),
    };

    let reason = form
        .map(|Form(form)| form.rejection_reason)
        .unwrap_or_default();

    // The reason is checked before the token so a bad submission leaves the link usable
    let decision = match Decision::reject(&reason) {
        Ok(decision) => decision,
        Err(e) => return error_response(e, format),
    };

    match state
        .certifications
        .process(request_id, token, decision)
        .await
    {
        Ok(outcome) => outcome_response(request_id, outcome, format),
        Err(e) => error_response(e, format),
    }
}

async fn method_not_allowed(format: ResponseFormat) -> Response {
    error_response(AppError::MethodNotAllowed, format)
}
