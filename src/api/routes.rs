//! API Routes
//!
//! HTTP endpoint definitions. Task operations only publish events; the
//! ledger effects land when the dispatcher consumes them, so mutating
//! endpoints answer 202 Accepted.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::{LedgerEngine, LedgerError, MyStatistics};

use super::middleware::Caller;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub jira_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub guid: Uuid,
    pub title: String,
    pub jira_id: String,
    pub assigned_to: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CompleteTaskResponse {
    pub guid: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ShuffleResponse {
    pub reassigned: u32,
}

#[derive(Debug, Serialize)]
pub struct TotalStatisticsResponse {
    pub date: NaiveDate,
    pub earned: i64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router. Every route expects a resolved [`Caller`];
/// the identity middleware is layered on in the binary.
pub fn create_router() -> Router<Arc<LedgerEngine>> {
    Router::new()
        // Statistics
        .route("/statistics/total", get(total_statistics))
        .route("/statistics/me", get(my_statistics))
        // Task operations
        .route("/tasks", post(create_task))
        .route("/tasks/:guid/complete", post(complete_task))
        .route("/tasks/shuffle", post(shuffle_tasks))
}

// =========================================================================
// GET /statistics/total
// =========================================================================

/// Today's management earnings: charges taken minus rewards paid.
/// Visible to admin and accountant roles.
async fn total_statistics(
    State(engine): State<Arc<LedgerEngine>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<TotalStatisticsResponse>, AppError> {
    if !caller.user.role.can_read_totals() {
        return Err(AppError::PermissionDenied);
    }

    let earned = engine.total_earned_today().await?;

    Ok(Json(TotalStatisticsResponse {
        date: Utc::now().date_naive(),
        earned,
    }))
}

// =========================================================================
// GET /statistics/me
// =========================================================================

/// The caller's balance and today's ledger entries.
async fn my_statistics(
    State(engine): State<Arc<LedgerEngine>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<MyStatistics>, AppError> {
    let stats = engine.statistics_for(caller.user.guid).await?;
    Ok(Json(stats))
}

// =========================================================================
// POST /tasks
// =========================================================================

/// Create a task. Assignment is uniform-random over eligible users; the
/// response is a receipt for the published events.
async fn create_task(
    State(engine): State<Arc<LedgerEngine>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), AppError> {
    let receipt = engine
        .create_task(request.title, request.jira_id, request.description)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTaskResponse {
            guid: receipt.guid,
            title: receipt.title,
            jira_id: receipt.jira_id,
            assigned_to: receipt.assigned_to,
        }),
    ))
}

// =========================================================================
// POST /tasks/:guid/complete
// =========================================================================

/// Publish completion for a task. Allowed for the task's assignee or a
/// privileged role.
async fn complete_task(
    State(engine): State<Arc<LedgerEngine>>,
    Extension(caller): Extension<Caller>,
    Path(guid): Path<Uuid>,
) -> Result<(StatusCode, Json<CompleteTaskResponse>), AppError> {
    let task = engine
        .store()
        .get_task(guid)
        .await?
        .ok_or(LedgerError::TaskNotFound(guid))?;
    if task.assigned_to != caller.user.guid && !caller.user.role.is_privileged() {
        return Err(AppError::PermissionDenied);
    }

    engine.complete_task(guid).await?;

    Ok((StatusCode::ACCEPTED, Json(CompleteTaskResponse { guid })))
}

// =========================================================================
// POST /tasks/shuffle
// =========================================================================

/// Reassign every open task at random. Privileged roles only.
async fn shuffle_tasks(
    State(engine): State<Arc<LedgerEngine>>,
    Extension(caller): Extension<Caller>,
) -> Result<(StatusCode, Json<ShuffleResponse>), AppError> {
    if !caller.user.role.is_privileged() {
        return Err(AppError::PermissionDenied);
    }

    let reassigned = engine.shuffle_tasks().await?;

    Ok((StatusCode::ACCEPTED, Json(ShuffleResponse { reassigned })))
}
