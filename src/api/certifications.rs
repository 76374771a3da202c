use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{CertificationRequest, NewCertificationRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/certifications", post(submit_certification))
        .route("/api/certifications/:id", get(get_certification))
}

/// POST /api/certifications - create a pending request and email the administrator
async fn submit_certification(
    State(state): State<AppState>,
    payload: Option<Json<NewCertificationRequest>>,
) -> Result<(StatusCode, Json<CertificationRequest>)> {
    let Json(data) = payload.ok_or_else(|| {
        AppError::Validation("Request body must be a JSON certification request".to_string())
    })?;

    let request = state.certifications.submit(data).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /api/certifications/:id
async fn get_certification(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<CertificationRequest>> {
    let request = state.certifications.find(&request_id).await?;
    Ok(Json(request))
}
