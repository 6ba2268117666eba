use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use uuid::Uuid;

use super::{
    error::ApiError,
    models::{
        HealthResponse, MappingAccepted, MappingRequest, MappingStatus, RedriveParams,
    },
    state::AppState,
};
use crate::keys::{ControlKey, FrameworkKey};
use crate::ledger::{JobRecord, LedgerError};
use crate::queue::{redrive, MappingMessage, RedriveReport, RedriveRequest, MAX_REDRIVE_MESSAGES};
use crate::suggest;

/// Suggestions returned alongside a 404 rejection
const SUGGESTION_LIMIT: usize = 10;

/// Mapping intake endpoint (POST /mappings)
///
/// Validates the request, creates a PENDING job, enqueues the workflow
/// intent, and answers 202 with the job id. The job record is durably
/// visible to the status endpoint before the response is returned.
///
/// Rejections carry no side effects: a malformed key is a 400; an unknown
/// source control or target framework is a 404 with up to ten near-miss
/// suggestions ranked by edit distance.
pub async fn submit_mapping(
    State(state): State<AppState>,
    Json(request): Json<MappingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source_key: ControlKey = request.control_key.parse()?;
    let target_framework: FrameworkKey = request.target_framework_key.parse()?;

    let catalog = state.ledger.catalog();

    if catalog.get_control(&source_key)?.is_none() {
        let candidates = catalog.list_control_keys(source_key.framework())?;
        return Err(ApiError::NotFound {
            message: format!("source control not found: {source_key}"),
            suggestions: Some(suggest::closest(
                &request.control_key,
                candidates,
                SUGGESTION_LIMIT,
            )),
        });
    }

    if !catalog.framework_exists(&target_framework)? {
        let candidates = catalog.list_framework_keys()?;
        return Err(ApiError::NotFound {
            message: format!("target framework not found: {target_framework}"),
            suggestions: Some(suggest::closest(
                &request.target_framework_key,
                candidates,
                SUGGESTION_LIMIT,
            )),
        });
    }

    // An explicit empty subset means "no filter"
    let target_control_ids = request.target_control_ids.filter(|ids| !ids.is_empty());

    // Fresh UUIDs collide only pathologically; one retry, then give up
    let mut job_id = Uuid::new_v4();
    for attempt in 0..2 {
        let record = JobRecord::new(
            job_id,
            source_key.clone(),
            target_framework.clone(),
            target_control_ids.clone(),
            state.config.retention.job_ttl_secs,
        );
        match state.ledger.jobs().create(record) {
            Ok(()) => break,
            Err(LedgerError::DuplicateJob(_)) if attempt == 0 => {
                job_id = Uuid::new_v4();
            }
            Err(error) => return Err(error.into()),
        }
    }

    // An enqueue failure leaves the job PENDING; the sweeper reissues it
    let message = MappingMessage {
        job_id,
        source_control_key: source_key.clone(),
        target_framework_key: target_framework.clone(),
        target_control_ids,
        enqueued_at: Utc::now(),
    };
    state.queue.enqueue(&message)?;

    state.metrics.job_accepted();

    let response = MappingAccepted {
        mapping_id: job_id,
        status: "ACCEPTED".to_string(),
        status_url: format!("/mappings/{job_id}"),
        control_key: source_key.to_string(),
        target_framework_key: target_framework.to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Mapping status endpoint (GET /mappings/{mapping_id})
///
/// Returns the job projection: status, timestamps, and the ranked result or
/// error once terminal.
pub async fn get_mapping(
    State(state): State<AppState>,
    axum::extract::Path(mapping_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound {
        message: format!("mapping not found: {mapping_id}"),
        suggestions: None,
    };

    let job_id: Uuid = mapping_id.parse().map_err(|_| not_found())?;
    let record = state
        .ledger
        .jobs()
        .get(&job_id)?
        .ok_or_else(not_found)?;

    Ok((StatusCode::OK, Json(MappingStatus::from(record))))
}

/// Operator redrive endpoint (POST /operators/redrive)
///
/// Out-of-band recovery path; not part of the client surface.
pub async fn redrive_dlq(
    State(state): State<AppState>,
    Json(params): Json<RedriveParams>,
) -> Result<Json<RedriveReport>, ApiError> {
    let report = redrive(
        &state.queue,
        RedriveRequest {
            dry_run: params.dry_run,
            max_messages: params.max_messages.unwrap_or(MAX_REDRIVE_MESSAGES),
        },
    )?;

    for _ in 0..report.messages_redriven {
        state.metrics.message_redriven();
    }
    Ok(Json(report))
}

/// Health check endpoint (GET /health)
///
/// Reports per-component state for the in-process pieces; the remote
/// science/agent services publish their own readiness.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "ledger".to_string(),
        match state.ledger.persist() {
            Ok(()) => "healthy".to_string(),
            Err(_) => "unhealthy".to_string(),
        },
    );
    components.insert(
        "queue".to_string(),
        match state.queue.health_check() {
            Ok(()) => "healthy".to_string(),
            Err(_) => "unhealthy".to_string(),
        },
    );

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
