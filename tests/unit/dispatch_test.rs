use dbrelay::dispatch::{Dispatcher, Task, TaskKind};
use dbrelay::error::DbrelayError;
use dbrelay::registry::SessionRegistry;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

async fn seed_database(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .expect("create sqlite database");

    sqlx::query("CREATE TABLE ebola_2014 (Country TEXT, Month INTEGER, Value INTEGER)")
        .execute(&pool)
        .await
        .expect("create table");
    sqlx::query("INSERT INTO ebola_2014 VALUES ('Guinea', 3, 122), ('Liberia', 4, 8)")
        .execute(&pool)
        .await
        .expect("insert rows");
    sqlx::query("CREATE TABLE no_rows (a TEXT)")
        .execute(&pool)
        .await
        .expect("create empty table");

    pool.close().await;
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(SessionRegistry::new()), None)
}

fn connect_task(path: &Path) -> Task {
    Task::new(TaskKind::Connect).with_message(json!({
        "dialect": "sqlite",
        "storage": path.to_string_lossy(),
    }))
}

async fn seeded(dir: &TempDir, name: &str) -> (Dispatcher, PathBuf) {
    let path = dir.path().join(name);
    seed_database(&path).await;
    (dispatcher(), path)
}

// --- session lifecycle ---

#[tokio::test]
async fn add_session_registers_a_placeholder() {
    let dispatcher = dispatcher();
    let task = Task::new(TaskKind::AddSession)
        .with_message(json!({ "dialect": "sqlite", "database": "/tmp/x.db" }));

    let listed = dispatcher.dispatch(task).await.expect("add session");
    assert_eq!(
        listed["sessions"],
        json!([{ "0": "Session currently empty." }])
    );
}

#[tokio::test]
async fn added_sessions_get_the_next_free_integer_id() {
    let dispatcher = dispatcher();
    for _ in 0..2 {
        let task = Task::new(TaskKind::AddSession)
            .with_message(json!({ "dialect": "mysql", "database": "plotly" }));
        dispatcher.dispatch(task).await.expect("add session");
    }

    assert_eq!(dispatcher.registry().ids(), vec!["0", "1"]);
}

#[tokio::test]
async fn add_session_without_dialect_is_rejected() {
    let dispatcher = dispatcher();
    let task = Task::new(TaskKind::AddSession).with_message(json!({ "database": "plotly" }));

    let err = dispatcher.dispatch(task).await.expect_err("must fail");
    assert!(matches!(err, DbrelayError::ParameterMissing(_)));
    assert!(err.to_string().contains("No dialect entry found"));
}

#[tokio::test]
async fn add_session_with_unknown_dialect_is_rejected() {
    let dispatcher = dispatcher();
    let task = Task::new(TaskKind::AddSession)
        .with_message(json!({ "dialect": "mongodb", "database": "x" }));

    let err = dispatcher.dispatch(task).await.expect_err("must fail");
    assert_eq!(
        err.to_string(),
        "Dialect [mongodb] is not supported by any connection manager"
    );
}

#[tokio::test]
async fn delete_session_reassigns_current_and_rejects_unknown_ids() {
    let dispatcher = dispatcher();
    for _ in 0..2 {
        let task = Task::new(TaskKind::AddSession)
            .with_message(json!({ "dialect": "sqlite", "database": "/tmp/x.db" }));
        dispatcher.dispatch(task).await.expect("add session");
    }
    // The most recently added session is current.
    assert_eq!(dispatcher.registry().current(), Some("1".to_string()));

    let listed = dispatcher
        .dispatch(Task::new(TaskKind::DeleteSession).with_session("1"))
        .await
        .expect("delete session");
    assert_eq!(listed["sessions"].as_array().map(Vec::len), Some(1));
    assert_eq!(dispatcher.registry().current(), Some("0".to_string()));

    let err = dispatcher
        .dispatch(Task::new(TaskKind::DeleteSession).with_session("9"))
        .await
        .expect_err("unknown session");
    assert!(matches!(err, DbrelayError::SessionNotFound));
}

#[tokio::test]
async fn connect_on_an_existing_session_must_match_its_dialect() {
    let dispatcher = dispatcher();
    let task = Task::new(TaskKind::AddSession)
        .with_message(json!({ "dialect": "sqlite", "database": "/tmp/x.db" }));
    dispatcher.dispatch(task).await.expect("add session");

    // A config naming another family is rejected before any handle is built.
    let task = Task::new(TaskKind::Connect)
        .with_session("0")
        .with_message(json!({ "dialect": "elasticsearch", "host": "localhost" }));
    let err = dispatcher.dispatch(task).await.expect_err("dialect mismatch");
    assert!(err.to_string().contains("bound to dialect [sqlite]"));

    // The session is untouched: no mismatched handle was stored, so later
    // tasks still report the missing connection instead of a routing error.
    let err = dispatcher
        .dispatch(Task::new(TaskKind::Tables))
        .await
        .expect_err("still not connected");
    assert!(matches!(err, DbrelayError::AppNotConnected));
}

#[tokio::test]
async fn read_tasks_with_an_explicit_session_leave_current_unchanged() {
    let dispatcher = dispatcher();
    for _ in 0..2 {
        let task = Task::new(TaskKind::AddSession)
            .with_message(json!({ "dialect": "sqlite", "database": "/tmp/x.db" }));
        dispatcher.dispatch(task).await.expect("add session");
    }
    assert_eq!(dispatcher.registry().current(), Some("1".to_string()));

    // The explicit id shadows the selection for this task only.
    let task = Task::new(TaskKind::Tables).with_session("0");
    dispatcher.dispatch(task).await.expect_err("placeholder has no handle");
    assert_eq!(dispatcher.registry().current(), Some("1".to_string()));
}

// --- sqlite end to end ---

#[tokio::test]
async fn connected_sessions_are_labelled_with_dialect_user_and_host() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "label.db").await;

    let task = Task::new(TaskKind::Connect).with_message(json!({
        "dialect": "sqlite",
        "username": "reader",
        "storage": path.to_string_lossy(),
    }));
    dispatcher.dispatch(task).await.expect("connect");

    let listed = dispatcher
        .dispatch(Task::new(TaskKind::Sessions))
        .await
        .expect("sessions");
    assert_eq!(
        listed["sessions"],
        json!([{ "0": "sqlite:reader@localhost" }])
    );
}

#[tokio::test]
async fn connect_then_databases_reports_the_sqlite_placeholder() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "e2e.db").await;

    let connected = dispatcher.dispatch(connect_task(&path)).await.expect("connect");
    assert_eq!(connected, json!({ "error": null }));

    let payload = dispatcher
        .dispatch(Task::new(TaskKind::Databases))
        .await
        .expect("databases");
    assert_eq!(payload["error"], Value::Null);
    assert_eq!(payload["databases"], json!(["SQLITE database accessed"]));

    // Sqlite goes straight to the table listing.
    let tables = payload["tables"].as_array().expect("tables array");
    assert!(tables.iter().any(|t| t.get("ebola_2014").is_some()));
}

#[tokio::test]
async fn tables_lists_every_table_as_a_map_entry() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "tables.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let payload = dispatcher
        .dispatch(Task::new(TaskKind::Tables))
        .await
        .expect("tables");
    let tables = payload["tables"].as_array().expect("tables array");

    assert_eq!(tables.len(), 2);
    assert!(tables.iter().any(|t| t.get("ebola_2014") == Some(&json!({}))));
    assert!(tables.iter().any(|t| t.get("no_rows").is_some()));
}

#[tokio::test]
async fn query_returns_normalized_rows() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "query.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let task = Task::new(TaskKind::Query).with_message(json!(
        "SELECT Country, Month, Value FROM ebola_2014 ORDER BY Month"
    ));
    let payload = dispatcher.dispatch(task).await.expect("query");

    assert_eq!(payload["error"], Value::Null);
    assert_eq!(payload["columnnames"], json!(["Country", "Month", "Value"]));
    assert_eq!(payload["ncols"], json!(3));
    assert_eq!(payload["nrows"], json!(2));
    assert_eq!(payload["rows"][0], json!(["Guinea", 3, 122]));
    assert_eq!(payload["rows"][1], json!(["Liberia", 4, 8]));
}

#[tokio::test]
async fn query_without_a_result_set_acknowledges_execution() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "ddl.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let task = Task::new(TaskKind::Query).with_message(json!("CREATE TABLE made_later (a TEXT)"));
    let payload = dispatcher.dispatch(task).await.expect("query");

    assert_eq!(payload["rows"], json!([["command executed"]]));
}

#[tokio::test]
async fn query_with_a_non_string_message_names_the_missing_parameter() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "param.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let err = dispatcher
        .dispatch(Task::new(TaskKind::Query))
        .await
        .expect_err("missing statement");
    assert!(err.to_string().contains("No query statement found"));
}

#[tokio::test]
async fn preview_substitutes_the_empty_table_sentinel() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "preview.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let task = Task::new(TaskKind::Preview).with_message(json!(["ebola_2014", "no_rows"]));
    let payload = dispatcher.dispatch(task).await.expect("preview");

    let previews = payload["previews"].as_array().expect("previews array");
    assert_eq!(previews.len(), 2);

    let filled = &previews[0]["ebola_2014"];
    assert_eq!(filled["nrows"], json!(2));

    let empty = &previews[1]["no_rows"];
    assert_eq!(empty["columnnames"], json!(["NA"]));
    assert_eq!(empty["rows"], json!([["empty table"]]));
}

#[tokio::test]
async fn preview_isolates_a_failing_table_from_the_batch() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "isolate.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let task = Task::new(TaskKind::Preview).with_message(json!(["ebola_2014", "no_such_table"]));
    let payload = dispatcher.dispatch(task).await.expect("preview");

    let previews = payload["previews"].as_array().expect("previews array");
    assert_eq!(previews[0]["ebola_2014"]["nrows"], json!(2));
    assert!(previews[1]["no_such_table"]["error"].is_string());
}

#[tokio::test]
async fn select_database_twice_keeps_the_same_handle() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "idem.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let generation = |registry: &SessionRegistry| {
        let slot = registry.get("0").expect("session 0");
        async move { slot.lock().await.handle_generation }
    };
    let before = generation(dispatcher.registry()).await;

    let same = Task::new(TaskKind::SelectDatabase)
        .with_database(path.to_string_lossy().to_string());
    dispatcher.dispatch(same.clone()).await.expect("reselect");
    dispatcher.dispatch(same).await.expect("reselect again");
    assert_eq!(generation(dispatcher.registry()).await, before);

    // Switching to a different database rebuilds the handle.
    let other = dir.path().join("idem_other.db");
    seed_database(&other).await;
    let switch = Task::new(TaskKind::SelectDatabase)
        .with_database(other.to_string_lossy().to_string());
    dispatcher.dispatch(switch).await.expect("switch");
    assert_eq!(generation(dispatcher.registry()).await, before + 1);
}

#[tokio::test]
async fn disconnect_then_tables_fails_with_app_not_connected() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "disc.db").await;
    dispatcher.dispatch(connect_task(&path)).await.expect("connect");

    let cleared = dispatcher
        .dispatch(Task::new(TaskKind::Disconnect))
        .await
        .expect("disconnect");
    assert_eq!(
        cleared,
        json!({ "databases": null, "error": null, "tables": null, "previews": null })
    );

    let err = dispatcher
        .dispatch(Task::new(TaskKind::Tables))
        .await
        .expect_err("stale session");
    assert!(matches!(err, DbrelayError::AppNotConnected));
}

#[tokio::test]
async fn tasks_without_any_session_fail_with_app_not_connected() {
    let err = dispatcher()
        .dispatch(Task::new(TaskKind::Query).with_message(json!("SELECT 1")))
        .await
        .expect_err("no session");
    assert!(matches!(err, DbrelayError::AppNotConnected));
}

// --- compound v0 tasks ---

#[tokio::test]
async fn connect_and_show_databases_chains_both_steps() {
    let dir = TempDir::new().expect("tempdir");
    let (dispatcher, path) = seeded(&dir, "compound.db").await;

    let task = Task::new(TaskKind::ConnectAndShowDatabases).with_message(json!({
        "dialect": "sqlite",
        "storage": path.to_string_lossy(),
    }));
    let payload = dispatcher.dispatch(task).await.expect("compound connect");

    assert_eq!(payload["databases"], json!(["SQLITE database accessed"]));
}

// --- task parsing ---

#[tokio::test]
async fn unknown_task_names_are_reported_verbatim() {
    let parsed = Task::from_value(&json!({ "task": "FROBNICATE" }));
    let err = parsed.expect_err("unknown task");
    assert_eq!(err.to_string(), "Task FROBNICATE is not implemented.");
}

#[test]
fn wire_tasks_carry_session_and_database() {
    let task = Task::from_value(&json!({
        "task": "TABLES",
        "sessionId": "2",
        "database": "plotly",
        "message": null,
    }))
    .expect("parse task");

    assert_eq!(task.kind, TaskKind::Tables);
    assert_eq!(task.session_id.as_deref(), Some("2"));
    assert_eq!(task.database.as_deref(), Some("plotly"));
}
