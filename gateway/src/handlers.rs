use crate::error::ApiError;
use crate::models::*;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use bridge_lib::{handle, lifecycle, script, ResourceKind};
use serde_json::Value;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

// GET /v1/status
pub async fn get_status() -> Json<StatusResponse> {
    let handles = ResourceKind::ALL
        .iter()
        .map(|kind| (kind.name().to_string(), handle::live_count(*kind)))
        .collect();
    let store_path = lifecycle::config().map(|config| config.store.path.display().to_string());

    Json(StatusResponse {
        version: bridge_lib::VERSION.to_string(),
        state: lifecycle::state_name(lifecycle::get_state()).to_string(),
        store_path,
        handles,
    })
}

// GET /v1/functions
pub async fn list_functions() -> Json<FunctionsResponse> {
    Json(FunctionsResponse {
        functions: script::functions().map(str::to_string).collect(),
    })
}

// POST /v1/call/:function
pub async fn call_function(
    Path(function): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<CallResponse>, ApiError> {
    if script::returns(&function).is_none() {
        return Err(ApiError::UnknownFunction(function));
    }
    if !params.is_object() {
        return Err(ApiError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    }

    tracing::debug!("Calling {} with {}", function, params);

    // may block on disk or on a host reply
    let name = function.clone();
    let result = tokio::task::spawn_blocking(move || script::call(&name, &params.to_string()))
        .await?
        .ok_or(ApiError::UnknownFunction(function))?;

    Ok(Json(CallResponse { result }))
}

// GET /v1/logs?limit=n
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if limit == 0 || limit > MAX_LOG_LIMIT {
        return Err(ApiError::InvalidRequest(format!(
            "limit must be between 1 and {}",
            MAX_LOG_LIMIT
        )));
    }

    let logs = state
        .logs
        .lock()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let events = logs.try_iter().take(limit).map(LogEntry::from).collect();

    Ok(Json(LogsResponse { events }))
}
