use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::hub::HubHandle;
use crate::model::{Alert, CheckResult, Service, ServiceId, ServiceStatus, UptimeSummary};
use crate::monitor::{CheckOutcome, Prober};
use crate::source::{SharedSource, SourceError};
use crate::storage::{SharedStore, StoreError};

/// Application state shared across handlers
pub struct AppState {
    pub store: SharedStore,
    pub source: SharedSource,
    pub prober: Arc<Prober>,
    pub hub: HubHandle,
}

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub service_id: ServiceId,
    pub name: String,
    pub url: String,
    pub is_up: bool,
    pub status_code: i32,
    pub response_time: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl StatusView {
    fn new(service: &Service, status: Option<&ServiceStatus>) -> Self {
        Self {
            service_id: service.id,
            name: service.name.clone(),
            url: service.url.clone(),
            is_up: status.map(|s| s.is_up).unwrap_or(false),
            status_code: status.map(|s| s.status_code).unwrap_or(0),
            response_time: status.map(|s| s.response_time_ms).unwrap_or(0),
            last_checked_at: status.map(|s| s.last_checked),
        }
    }
}

pub async fn list_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StatusView>>, ApiError> {
    let mut services = state.source.services().await?;
    services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let statuses: HashMap<ServiceId, ServiceStatus> = state
        .store
        .all_statuses()
        .await?
        .into_iter()
        .map(|s| (s.service_id, s))
        .collect();

    Ok(Json(
        services
            .iter()
            .map(|s| StatusView::new(s, statuses.get(&s.id)))
            .collect(),
    ))
}

pub async fn service_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
) -> Result<Json<StatusView>, ApiError> {
    let service = find_service(&state, id).await?;
    let status = state.store.status(id).await?;
    Ok(Json(StatusView::new(&service, status.as_ref())))
}

// ============================================================================
// History
// ============================================================================

fn limit_or_default(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

#[derive(Deserialize)]
pub struct ChecksQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub async fn service_checks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
    query: Result<Query<ChecksQuery>, QueryRejection>,
) -> Result<Json<Vec<CheckResult>>, ApiError> {
    let Query(query) = query?;
    find_service(&state, id).await?;

    let checks = state
        .store
        .recent_checks(id, query.from, query.to, limit_or_default(query.limit))
        .await?;
    Ok(Json(checks))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn service_alerts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let Query(query) = query?;
    find_service(&state, id).await?;
    Ok(Json(
        state
            .store
            .recent_alerts(id, limit_or_default(query.limit))
            .await?,
    ))
}

#[derive(Deserialize)]
pub struct UptimeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn service_uptime(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
    query: Result<Query<UptimeQuery>, QueryRejection>,
) -> Result<Json<UptimeSummary>, ApiError> {
    let Query(query) = query?;
    find_service(&state, id).await?;

    // Both bounds or neither; otherwise the last 24 hours
    let (from, to) = match (query.from, query.to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            let to = Utc::now();
            (to - Duration::hours(24), to)
        }
    };
    if from > to {
        return Err(ApiError::BadRequest("'from' must not be after 'to'".to_string()));
    }

    let checks = state.store.checks_between(id, from, to).await?;
    Ok(Json(UptimeSummary::compute(id, from, to, &checks)))
}

// ============================================================================
// On-demand check
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub service_id: ServiceId,
    pub is_up: bool,
    pub status_code: i32,
    pub response_time: i64,
    pub error: Option<String>,
    pub recorded: bool,
    pub alert: Option<String>,
}

pub async fn run_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
) -> Result<Json<CheckResponse>, ApiError> {
    let service = find_service(&state, id).await?;

    let response = match state.prober.run_check(&service).await {
        CheckOutcome::Completed {
            check, transition, ..
        } => CheckResponse {
            service_id: id,
            is_up: check.is_up,
            status_code: check.status_code,
            response_time: check.response_time_ms,
            error: check.error,
            recorded: true,
            alert: transition.alert.map(|k| k.to_string()),
        },
        CheckOutcome::TransitionFailed { check, .. } => CheckResponse {
            service_id: id,
            is_up: check.is_up,
            status_code: check.status_code,
            response_time: check.response_time_ms,
            error: check.error,
            recorded: true,
            alert: None,
        },
        CheckOutcome::LogFailed { check, .. } => CheckResponse {
            service_id: id,
            is_up: check.is_up,
            status_code: check.status_code,
            response_time: check.response_time_ms,
            error: check.error,
            recorded: false,
            alert: None,
        },
    };

    Ok(Json(response))
}

async fn find_service(state: &AppState, id: ServiceId) -> Result<Service, ApiError> {
    state
        .source
        .service(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Service {} not found", id)))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Store request failed");
        ApiError::Internal(e.to_string())
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        tracing::error!(error = %e, "Service source request failed");
        ApiError::Internal(e.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
