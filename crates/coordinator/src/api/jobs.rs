//! Job endpoints: creation, leasing, heartbeat, and progress reporting

use crate::auth::Claims;
use crate::error::{WebError, WebResult};
use crate::models::{Job, JobType};
use crate::state::AppState;
use axum::{extract::Query, extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub input_data: Value,
    pub kraus_operator: Option<String>,
    pub vector: Option<String>,
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/jobs/create",
    request_body = CreateJobRequest,
    responses((status = 200, description = "Job created"))
))]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> WebResult<Json<CreateJobResponse>> {
    let job_type = JobType::from_str(&req.job_type).map_err(WebError::BadRequest)?;

    let job = state
        .jobs
        .create_job(
            job_type,
            req.input_data,
            req.kraus_operator,
            req.vector,
            req.channel_id,
            req.priority,
        )
        .await?;

    state.wake.notify_one();
    Ok(Json(CreateJobResponse { job_id: job.id }))
}

#[derive(Debug, Serialize)]
pub struct RequestedJob {
    pub job_id: String,
    pub job_type: String,
    pub job_data: Value,
    pub job_status: String,
    pub kraus_id: Option<String>,
    pub vector_id: Option<String>,
    pub channel_id: Option<i64>,
}

impl From<Job> for RequestedJob {
    fn from(job: Job) -> Self {
        RequestedJob {
            job_id: job.id,
            job_type: job.job_type.clone(),
            job_data: serde_json::from_str(&job.input_data).unwrap_or(Value::Null),
            job_status: job.status.clone(),
            kraus_id: job.kraus_operator,
            vector_id: job.vector,
            channel_id: job.channel_id,
        }
    }
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/jobs/request",
    responses(
        (status = 200, description = "Job leased"),
        (status = 204, description = "No work available"),
    )
))]
pub async fn request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> WebResult<Json<RequestedJob>> {
    let job = state
        .jobs
        .assign_job_to_worker(&claims.sub)
        .await?
        .ok_or(WebError::NoWork)?;

    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct JobIdBody {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct PongResponse {
    pub message: &'static str,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/jobs/ping",
    request_body = JobIdBody,
    responses((status = 200, description = "Heartbeat accepted"))
))]
pub async fn ping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<JobIdBody>,
) -> WebResult<Json<PongResponse>> {
    state.jobs.ping(&claims.sub, &body.job_id).await?;
    Ok(Json(PongResponse { message: "pong" }))
}

#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub job_status: String,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/jobs/status",
    params(("job_id" = String, Query)),
    responses((status = 200, description = "Current job status"))
))]
pub async fn status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(q): Query<JobIdQuery>,
) -> WebResult<Json<JobStatusResponse>> {
    let job = own_job(&state, &claims, &q.job_id).await?;
    Ok(Json(JobStatusResponse {
        job_id: job.id,
        job_status: job.status,
    }))
}

/// Fetch a job and confirm the caller is the worker currently (or most
/// recently) bound to it. Admins may act on any job.
async fn own_job(state: &AppState, claims: &Claims, job_id: &str) -> WebResult<Job> {
    let job = state.jobs.get_job(job_id).await?;
    if claims.role().is_admin() {
        return Ok(job);
    }
    match &job.worker_id {
        Some(worker_id) if worker_id == &claims.sub => Ok(job),
        _ => Err(WebError::Forbidden(
            "job is not owned by this worker".to_string(),
        )),
    }
}

pub async fn pause(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<JobIdBody>,
) -> WebResult<()> {
    own_job(&state, &claims, &body.job_id).await?;
    state.jobs.pause(&body.job_id).await
}

pub async fn resume(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<JobIdBody>,
) -> WebResult<()> {
    own_job(&state, &claims, &body.job_id).await?;
    state.jobs.resume(&body.job_id).await?;
    state.wake.notify_one();
    Ok(())
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<JobIdBody>,
) -> WebResult<()> {
    own_job(&state, &claims, &body.job_id).await?;
    state.jobs.cancel(&body.job_id).await
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<JobIdBody>,
) -> WebResult<()> {
    own_job(&state, &claims, &body.job_id).await?;
    state.jobs.complete(&body.job_id).await?;
    state.wake.notify_one();
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct UpdateIterationsRequest {
    pub job_id: String,
    pub num_iterations: i64,
}

pub async fn update_iterations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateIterationsRequest>,
) -> WebResult<()> {
    own_job(&state, &claims, &req.job_id).await?;
    state.jobs.update_iterations(&req.job_id, req.num_iterations).await
}

#[derive(Debug, Deserialize)]
pub struct UpdateEntropyRequest {
    pub job_id: String,
    pub entropy: f64,
}

pub async fn update_entropy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateEntropyRequest>,
) -> WebResult<()> {
    own_job(&state, &claims, &req.job_id).await?;
    state.jobs.update_entropy(&req.job_id, req.entropy).await
}
