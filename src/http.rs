use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{DatabaseEngine, ListFilter};
use crate::job::{Job, RetryPolicy, DEFAULT_QUEUE, MAX_RETRIES};
use crate::models::{QueueRecord, QueueStatus};
use crate::schedule;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<DatabaseEngine>,
}

pub fn router(engine: Arc<DatabaseEngine>) -> Router {
    Router::new()
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/:id", get(get_job_handler).delete(delete_job_handler))
        .route("/jobs/:id/requeue", post(requeue_job_handler))
        .with_state(AppState { engine })
}

pub async fn serve(engine: Arc<DatabaseEngine>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!("🚀 Server running on {}", addr);

    axum::serve(listener, app).await
}

#[derive(Debug, Serialize)]
struct JobDto {
    id: i64,
    queue: String,
    status: String,
    scheduled: NaiveDateTime,
    locked: Option<NaiveDateTime>,
    created: NaiveDateTime,
    modified: NaiveDateTime,
    name: Option<String>,
    arguments: Option<Value>,
    attempts: Option<u32>,
    timeout: Option<u64>,
    retry: Option<RetryPolicy>,
}

fn transform_job(record: QueueRecord) -> JobDto {
    let job = Job::deserialize(&record.data).ok();

    JobDto {
        id: record.id,
        queue: record.queue_name,
        status: record.status,
        scheduled: record.scheduled,
        locked: record.locked,
        created: record.created,
        modified: record.modified,
        name: job.as_ref().map(|job| job.name.clone()),
        arguments: job.as_ref().map(|job| job.arguments.clone()),
        attempts: job.as_ref().map(Job::attempts),
        timeout: job.as_ref().map(|job| job.timeout),
        retry: job.and_then(|job| job.retry),
    }
}

type HandlerResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal_error(message: &str) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, message.into())
}

#[derive(Deserialize)]
pub struct NewJobInput {
    name: String,
    queue: Option<String>,
    arguments: Option<Value>,
    schedule: Option<String>,
    timeout: Option<u64>,
    max_retries: Option<u32>,
    retry_wait: Option<String>,
}

#[derive(Serialize)]
pub struct JobResponse {
    job: JobDto,
}

pub async fn create_job_handler(
    State(state): State<AppState>,
    Json(new_job_input): Json<NewJobInput>,
) -> HandlerResult<JobResponse> {
    let name = new_job_input.name.trim();
    let queue = new_job_input
        .queue
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_QUEUE);
    let when = new_job_input.schedule.as_deref().unwrap_or("now");

    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name cannot be empty.".into()));
    }

    if queue.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "queue cannot be empty.".into()));
    }

    if new_job_input.max_retries.is_some_and(|retries| retries > MAX_RETRIES) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("max_retries must be less than or equal to {MAX_RETRIES}."),
        ));
    }

    let now = state.engine.now();
    for expression in [Some(when), new_job_input.retry_wait.as_deref()].into_iter().flatten() {
        if schedule::resolve(expression, now).is_err() {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("'{expression}' is not a valid schedule."),
            ));
        }
    }

    let mut job = Job::new(name, new_job_input.arguments.unwrap_or(Value::Null)).on_queue(queue);
    if let Some(timeout) = new_job_input.timeout {
        job = job.with_timeout(timeout);
    }
    if let Some(max_retries) = new_job_input.max_retries {
        job = job.with_retry(max_retries, new_job_input.retry_wait.as_deref().unwrap_or("now"));
    }

    match state.engine.add(&mut job, when) {
        Ok(true) => {}
        Ok(false) => return Err(internal_error("Failed to create job.")),
        Err(e) => {
            log::error!("Failed to create job. {}", e);
            return Err(internal_error("Failed to create job."));
        }
    }

    let Some(id) = job.id() else {
        return Err(internal_error("Failed to create job."));
    };

    let record = find_record(&state.engine, id)?;
    log::info!("Created {} job on {}.", job.name, job.queue);

    Ok(Json(JobResponse {
        job: transform_job(record),
    }))
}

#[derive(Deserialize, Default)]
pub struct ListJobsQuery {
    queue: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ListJobsResponse {
    jobs: Vec<JobDto>,
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> HandlerResult<ListJobsResponse> {
    let status = match query.status.as_deref() {
        Some(status) => Some(
            status
                .parse::<QueueStatus>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
        ),
        None => None,
    };

    if query.limit.is_some_and(|limit| limit < 1) {
        return Err((StatusCode::BAD_REQUEST, "limit must be positive.".into()));
    }

    let filter = ListFilter {
        queue: query.queue,
        status,
        limit: query.limit,
    };

    match state.engine.list(&filter) {
        Ok(records) => {
            let jobs = records.into_iter().map(transform_job).collect();
            Ok(Json(ListJobsResponse { jobs }))
        }
        Err(e) => {
            log::error!("Failed to fetch jobs. {}", e);
            Err(internal_error("Failed to fetch jobs."))
        }
    }
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HandlerResult<JobResponse> {
    let record = find_record(&state.engine, id)?;

    Ok(Json(JobResponse {
        job: transform_job(record),
    }))
}

/// Manual recovery for failed rows and rows left locked by a dead worker.
pub async fn requeue_job_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HandlerResult<JobResponse> {
    find_record(&state.engine, id)?;

    match state.engine.requeue(id) {
        Ok(true) => {}
        Ok(false) => return Err(internal_error("Failed to requeue job.")),
        Err(e) => {
            log::error!("Failed to requeue job {}. {}", id, e);
            return Err(internal_error("Failed to requeue job."));
        }
    }

    log::info!("Requeued job with id {}.", id);
    let record = find_record(&state.engine, id)?;

    Ok(Json(JobResponse {
        job: transform_job(record),
    }))
}

pub async fn delete_job_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    find_record(&state.engine, id)?;

    match state.engine.delete_record(id) {
        Ok(true) => {
            log::info!("Deleted job with id {}.", id);
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(internal_error("Failed to delete job.")),
        Err(e) => {
            log::error!("Failed to delete job {}. {}", id, e);
            Err(internal_error("Failed to delete job."))
        }
    }
}

fn find_record(engine: &DatabaseEngine, id: i64) -> Result<QueueRecord, (StatusCode, String)> {
    match engine.get(id) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err((StatusCode::NOT_FOUND, "Job does not exist.".into())),
        Err(e) => {
            log::error!("Failed to fetch job {}. {}", id, e);
            Err(internal_error("Failed to fetch job."))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn state() -> AppState {
        AppState {
            engine: Arc::new(DatabaseEngine::in_memory().unwrap()),
        }
    }

    fn input(value: Value) -> Json<NewJobInput> {
        Json(serde_json::from_value(value).unwrap())
    }

    async fn create(state: &AppState, value: Value) -> HandlerResult<JobResponse> {
        create_job_handler(State(state.clone()), input(value)).await
    }

    #[tokio::test]
    async fn creates_a_queued_job() {
        let state = state();

        let Json(response) = create(
            &state,
            json!({
                "name": " send_email ",
                "queue": "mail",
                "arguments": {"to": "amy@example.com"},
                "max_retries": 3,
                "retry_wait": "+1 minute"
            }),
        )
        .await
        .unwrap();

        let job = response.job;
        assert_eq!(job.name.as_deref(), Some("send_email"));
        assert_eq!(job.queue, "mail");
        assert_eq!(job.status, "queued");
        assert_eq!(job.attempts, Some(0));
        assert_eq!(job.retry.map(|retry| retry.limit), Some(3));
        assert!(state.engine.fetch("mail").unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let state = state();

        for body in [
            json!({"name": "  "}),
            json!({"name": "x", "queue": ""}),
            json!({"name": "x", "max_retries": 65}),
            json!({"name": "x", "schedule": "someday"}),
            json!({"name": "x", "max_retries": 1, "retry_wait": "later"}),
        ] {
            let error = create(&state, body.clone()).await.err();
            assert_eq!(
                error.map(|(status, _)| status),
                Some(StatusCode::BAD_REQUEST),
                "{body}"
            );
        }
        assert!(state.engine.list(&ListFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_with_filters() {
        let state = state();
        create(&state, json!({"name": "a", "queue": "mail"})).await.unwrap();
        create(&state, json!({"name": "b"})).await.unwrap();

        let Json(all) = list_jobs_handler(State(state.clone()), Query(ListJobsQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.jobs.len(), 2);

        let Json(mail) = list_jobs_handler(
            State(state.clone()),
            Query(ListJobsQuery {
                queue: Some("mail".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(mail.jobs.len(), 1);
        assert_eq!(mail.jobs[0].name.as_deref(), Some("a"));

        let bad_status = list_jobs_handler(
            State(state.clone()),
            Query(ListJobsQuery {
                status: Some("running".into()),
                ..Default::default()
            }),
        )
        .await;
        assert_eq!(bad_status.err().map(|(status, _)| status), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn requeues_failed_jobs() {
        let state = state();
        let Json(created) = create(&state, json!({"name": "a"})).await.unwrap();
        let job = state.engine.fetch("default").unwrap().unwrap();
        state.engine.fail(&job).unwrap();

        let Json(requeued) = requeue_job_handler(State(state.clone()), Path(created.job.id))
            .await
            .unwrap();

        assert_eq!(requeued.job.status, "queued");
        assert!(requeued.job.locked.is_none());
        assert!(state.engine.fetch("default").unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_jobs_are_not_found() {
        let state = state();

        let get = get_job_handler(State(state.clone()), Path(404)).await;
        let requeue = requeue_job_handler(State(state.clone()), Path(404)).await;
        let delete = delete_job_handler(State(state.clone()), Path(404)).await;

        assert_eq!(get.err().map(|(status, _)| status), Some(StatusCode::NOT_FOUND));
        assert_eq!(requeue.err().map(|(status, _)| status), Some(StatusCode::NOT_FOUND));
        assert_eq!(delete.err().map(|(status, _)| status), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn deletes_jobs() {
        let state = state();
        let Json(created) = create(&state, json!({"name": "a"})).await.unwrap();

        let status = delete_job_handler(State(state.clone()), Path(created.job.id))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.engine.get(created.job.id).unwrap().is_none());
    }
}
