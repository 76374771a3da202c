// API module - HTTP endpoints

pub mod approvals;
pub mod certifications;
pub mod health;
pub mod pages;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::WorkflowConfig;
use crate::db::CertificationStore;
use crate::services::certification::CertificationService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CertificationStore>,
    pub certifications: CertificationService,
    pub config: WorkflowConfig,
}

/// Builds the full router with every endpoint
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(approvals::router())
        .merge(certifications::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
