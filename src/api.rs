//! Versioned HTTP surface. Every `/v1` endpoint maps to exactly one task;
//! parameter validation happens here, before the dispatcher runs, and every
//! response body is mirrored onto the broadcast channel for IPC listeners.

use crate::dispatch::{Dispatcher, Task, TaskKind};
use crate::error::{self, DbrelayError};
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub events: broadcast::Sender<Value>,
}

type Params = Query<HashMap<String, String>>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/connect", get(connect))
        .route("/v1/authenticate", get(authenticate))
        .route("/v1/sessions", get(sessions))
        .route("/v1/deletesession", get(delete_session))
        .route("/v1/addsession", get(add_session))
        .route("/v1/databases", get(databases))
        .route("/v1/selectdatabase", get(select_database))
        .route("/v1/tables", get(tables))
        .route("/v1/preview", get(preview))
        .route("/v1/query", get(query))
        .route("/v1/disconnect", get(disconnect))
        .fallback(unknown_route)
        .with_state(state)
}

/// Run the task and mirror the response body to the IPC side. Failures come
/// back as the same `{error: {message, name}}` body with a 400 status.
async fn respond(state: &AppState, task: Task) -> Response {
    debug!(task = ?task.kind, "dispatching http task");
    let (ok, payload) = state.dispatcher.dispatch_to_payload(task).await;
    let _ = state.events.send(payload.clone());
    let status = if ok { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    (status, Json(payload)).into_response()
}

/// Parameter validation failure, raised before the dispatcher runs.
fn reject(state: &AppState, e: DbrelayError) -> Response {
    let payload = e.to_payload();
    let _ = state.events.send(payload.clone());
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn base_task(kind: TaskKind, params: &HashMap<String, String>) -> Task {
    let mut task = Task::new(kind);
    if let Some(session) = params.get("session") {
        task = task.with_session(session.clone());
    }
    if let Some(database) = params.get("database") {
        task = task.with_database(database.clone());
    }
    task
}

async fn connect(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    // The whole query string is the connection configuration; values stay
    // strings here and the config layer coerces port/ssl.
    let message: Map<String, Value> = params
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    let task = base_task(TaskKind::Connect, &params).with_message(Value::Object(message));
    respond(&state, task).await
}

async fn authenticate(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    respond(&state, base_task(TaskKind::Authenticate, &params)).await
}

async fn sessions(State(state): State<Arc<AppState>>) -> Response {
    respond(&state, Task::new(TaskKind::Sessions)).await
}

async fn delete_session(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    if !params.contains_key("session") {
        return reject(
            &state,
            DbrelayError::ParameterMissing(error::SESSION_PARAM.to_string()),
        );
    }
    respond(&state, base_task(TaskKind::DeleteSession, &params)).await
}

async fn add_session(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    let dialect = match params.get("dialect") {
        Some(dialect) => dialect.clone(),
        None => {
            return reject(
                &state,
                DbrelayError::ParameterMissing(error::DIALECT_PARAM.to_string()),
            )
        }
    };
    let database = match params.get("database") {
        Some(database) => database.clone(),
        None => {
            return reject(
                &state,
                DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string()),
            )
        }
    };

    let task = base_task(TaskKind::AddSession, &params)
        .with_message(serde_json::json!({ "dialect": dialect, "database": database }));
    respond(&state, task).await
}

async fn databases(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    respond(&state, base_task(TaskKind::Databases, &params)).await
}

async fn select_database(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    if !params.contains_key("database") {
        return reject(
            &state,
            DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string()),
        );
    }
    respond(&state, base_task(TaskKind::SelectDatabase, &params)).await
}

async fn tables(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    respond(&state, base_task(TaskKind::Tables, &params)).await
}

async fn preview(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    let names: Vec<Value> = params
        .get("tables")
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| Value::String(name.to_string()))
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        return reject(
            &state,
            DbrelayError::ParameterMissing(error::TABLES_PARAM.to_string()),
        );
    }

    let task = base_task(TaskKind::Preview, &params).with_message(Value::Array(names));
    respond(&state, task).await
}

async fn query(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    let statement = match params.get("statement") {
        Some(statement) => statement.clone(),
        None => {
            return reject(
                &state,
                DbrelayError::ParameterMissing(error::QUERY_PARAM.to_string()),
            )
        }
    };

    let task = base_task(TaskKind::Query, &params).with_message(Value::String(statement));
    respond(&state, task).await
}

async fn disconnect(State(state): State<Arc<AppState>>, Query(params): Params) -> Response {
    respond(&state, base_task(TaskKind::Disconnect, &params)).await
}

/// Anything outside the fixed route table: an unknown `/v1` endpoint is an
/// unimplemented task, any other version prefix is an unimplemented API.
async fn unknown_route(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let mut segments = uri.path().trim_start_matches('/').splitn(2, '/');
    let version = segments.next().unwrap_or("");
    let endpoint = segments.next().unwrap_or("");

    let e = if version == "v1" {
        DbrelayError::TaskNotImplemented(endpoint.to_uppercase())
    } else {
        DbrelayError::ApiVersionNotImplemented(version.to_string())
    };

    let payload = e.to_payload();
    let _ = state.events.send(payload.clone());
    (StatusCode::NOT_FOUND, Json(payload)).into_response()
}
