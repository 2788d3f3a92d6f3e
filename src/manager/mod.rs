//! Per-family orchestration: authenticate, connect, select-database, list,
//! preview, raw-query and disconnect semantics, built atop the connectors.

pub mod drill;
pub mod elastic;
pub mod objectstore;
pub mod relational;

use crate::connector::ConnectionHandle;
use crate::config::ConnectionConfig;
use crate::error::DbrelayError;
use crate::registry::{SessionRegistry, SessionSlot};
use crate::tabular::{self, TabularResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

pub use drill::DrillManager;
pub use elastic::ElasticManager;
pub use objectstore::ObjectStoreManager;
pub use relational::RelationalManager;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Uniform surface the task dispatcher drives. One implementation per
/// connector family.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Build a new handle from the supplied configuration, store it on the
    /// session (closing any previous handle) and authenticate.
    async fn connect(&self, session_id: &str, config: ConnectionConfig)
        -> Result<(), DbrelayError>;

    /// Validate the session's live handle. Fails with a connection error
    /// when no handle exists yet.
    async fn authenticate(&self, session_id: &str) -> Result<(), DbrelayError>;

    /// Bind the session to another database, rebuilding the handle only
    /// when the name differs from the active one. Always re-authenticates.
    async fn select_database(&self, session_id: &str, database: &str)
        -> Result<(), DbrelayError>;

    async fn list_databases(&self, session_id: &str) -> Result<Value, DbrelayError>;

    async fn list_tables(&self, session_id: &str) -> Result<Value, DbrelayError>;

    /// Bounded top-5 preview of each requested table, one concurrent
    /// request per table, collected with per-table isolation: a failing
    /// table contributes an error entry without aborting the batch.
    async fn preview_tables(&self, session_id: &str, tables: &[String])
        -> Result<Value, DbrelayError>;

    async fn send_raw_query(&self, session_id: &str, message: &Value)
        -> Result<Value, DbrelayError>;

    /// Two-phase shutdown: await the close under a bounded timeout, then
    /// clear the session's handle and respond with cleared state.
    async fn disconnect(&self, session_id: &str) -> Result<Value, DbrelayError>;
}

/// Fetch the slot for a session, treating an unknown id as "not connected"
/// so callers get the same error for a missing session and a missing handle.
pub(crate) fn session_slot(
    registry: &SessionRegistry,
    session_id: &str,
) -> Result<SessionSlot, DbrelayError> {
    registry.get(session_id).ok_or(DbrelayError::AppNotConnected)
}

/// Clone the live handle out of a session without holding its lock across
/// the subsequent I/O.
pub(crate) async fn live_handle(slot: &SessionSlot) -> Result<ConnectionHandle, DbrelayError> {
    let session = slot.lock().await;
    session.handle.clone().ok_or(DbrelayError::AppNotConnected)
}

/// Close a replaced or discarded handle, warning instead of hanging when
/// the driver does not finish in time.
pub(crate) async fn close_handle(session_id: &str, handle: ConnectionHandle) {
    if tokio::time::timeout(CLOSE_TIMEOUT, handle.close()).await.is_err() {
        warn!(session = session_id, "close did not complete in time");
    }
}

/// Tables payload: each name wrapped as a `{name: {}}` map entry.
pub(crate) fn tables_payload(names: Vec<String>) -> Value {
    let tables: Vec<Value> = names.into_iter().map(|name| json!({ name: {} })).collect();
    json!({ "error": null, "tables": tables })
}

pub(crate) fn databases_payload(databases: Vec<String>) -> Value {
    json!({ "error": null, "databases": databases, "tables": null })
}

/// Cleared state sent in response to a disconnect.
pub(crate) fn cleared_payload() -> Value {
    json!({ "databases": null, "error": null, "tables": null, "previews": null })
}

/// One preview entry. Zero-row tables become the empty-table sentinel;
/// failures are recorded per table instead of failing the batch.
pub(crate) fn preview_entry(table: &str, result: Result<TabularResult, DbrelayError>) -> Value {
    match result {
        Ok(preview) if preview.is_empty() => json!({ table: tabular::empty_table() }),
        Ok(preview) => json!({ table: preview }),
        Err(e) => json!({ table: { "error": e.to_string() } }),
    }
}

pub(crate) fn previews_payload(entries: Vec<Value>) -> Value {
    json!({ "error": null, "previews": entries })
}

/// First cell of every row, as strings. The preset listing queries return
/// one name per row.
pub(crate) fn first_column(result: &TabularResult) -> Vec<String> {
    result
        .rows
        .iter()
        .filter_map(|row| row.first())
        .map(|cell| match cell {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Merge a tabular result with `error: null` for the raw-query response.
/// Statements that produce no result set acknowledge with a single-cell
/// "command executed" table instead of a zero-column one.
pub(crate) fn query_payload(result: TabularResult) -> Value {
    if result.ncols == 0 {
        return tabular::command_executed().into_payload();
    }
    result.into_payload()
}
