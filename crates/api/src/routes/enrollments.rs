//! Enrollment read and progress endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use common::{CourseId, UserId};
use domain::{EnrollmentRecord, Progress};
use serde::{Deserialize, Serialize};
use workflow_store::WorkflowStore;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    #[serde(alias = "percentage")]
    pub progress_percentage: i64,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub enrolled: bool,
}

/// GET /enrollments/{userId}: every enrollment of a user.
#[tracing::instrument(skip(state, principal))]
pub async fn list<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<EnrollmentRecord>>, ApiError> {
    let user_id = UserId::from(user_id);
    principal.ensure_subject(&user_id)?;
    Ok(Json(state.store.list_enrollments(&user_id).await?))
}

/// GET /enrollments/{userId}/{courseId}: a single enrollment.
#[tracing::instrument(skip(state, principal))]
pub async fn get<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Path((user_id, course_id)): Path<(String, String)>,
) -> Result<Json<EnrollmentRecord>, ApiError> {
    let (user_id, course_id) = (UserId::from(user_id), CourseId::from(course_id));
    principal.ensure_subject(&user_id)?;
    state
        .store
        .get_enrollment(&user_id, &course_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("No enrollment of {user_id} in {course_id}"))
        })
}

/// GET /enrollments/{userId}/{courseId}/exists: whether the user is enrolled.
#[tracing::instrument(skip(state, principal))]
pub async fn exists<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Path((user_id, course_id)): Path<(String, String)>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let (user_id, course_id) = (UserId::from(user_id), CourseId::from(course_id));
    principal.ensure_subject(&user_id)?;
    let enrolled = state
        .store
        .get_enrollment(&user_id, &course_id)
        .await?
        .is_some();
    Ok(Json(ExistsResponse { enrolled }))
}

/// POST /enrollments/{userId}/{courseId}/progress: set progress (0-100).
#[tracing::instrument(skip(state, principal, req))]
pub async fn update_progress<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Path((user_id, course_id)): Path<(String, String)>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<EnrollmentRecord>, ApiError> {
    let (user_id, course_id) = (UserId::from(user_id), CourseId::from(course_id));
    principal.ensure_subject(&user_id)?;
    let progress = Progress::new(req.progress_percentage)?;
    let record = state
        .store
        .update_progress(&user_id, &course_id, progress)
        .await?;
    Ok(Json(record))
}
