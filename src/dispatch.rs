//! Task dispatcher: resolves a task against the session registry, routes it
//! to the connection manager for the session's dialect family, and runs the
//! task's call chain. Every task ends in exactly one payload, success or
//! error, funneled back through a single response path.

use crate::config::{self, ConnectionConfig};
use crate::dialect::{Dialect, Family};
use crate::error::{self, DbrelayError};
use crate::manager::{
    ConnectionManager, DrillManager, ElasticManager, ObjectStoreManager, RelationalManager,
};
use crate::registry::SessionRegistry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Closed set of task names. Compound variants chain several simple tasks
/// and exist for callers speaking the older message shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Connect,
    Authenticate,
    Sessions,
    DeleteSession,
    AddSession,
    Databases,
    SelectDatabase,
    Tables,
    Preview,
    Query,
    Disconnect,
    ConnectAndShowDatabases,
    CheckConnectionAndShowDatabases,
    SelectDatabaseAndShowTables,
}

impl FromStr for TaskKind {
    type Err = DbrelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(TaskKind::Connect),
            "AUTHENTICATE" => Ok(TaskKind::Authenticate),
            "SESSIONS" => Ok(TaskKind::Sessions),
            "DELETE_SESSION" => Ok(TaskKind::DeleteSession),
            "ADD_SESSION" => Ok(TaskKind::AddSession),
            "DATABASES" => Ok(TaskKind::Databases),
            "SELECT_DATABASE" => Ok(TaskKind::SelectDatabase),
            "TABLES" => Ok(TaskKind::Tables),
            "PREVIEW" => Ok(TaskKind::Preview),
            "QUERY" => Ok(TaskKind::Query),
            "DISCONNECT" => Ok(TaskKind::Disconnect),
            "CONNECT_AND_SHOW_DATABASES" => Ok(TaskKind::ConnectAndShowDatabases),
            "CHECK_CONNECTION_AND_SHOW_DATABASES" => {
                Ok(TaskKind::CheckConnectionAndShowDatabases)
            }
            "SELECT_DATABASE_AND_SHOW_TABLES" => Ok(TaskKind::SelectDatabaseAndShowTables),
            other => Err(DbrelayError::TaskNotImplemented(other.to_string())),
        }
    }
}

/// Immutable request descriptor. Tasks never hold a connection handle; they
/// carry only the ids and payload needed to resolve one.
#[derive(Debug, Clone)]
pub struct Task {
    pub kind: TaskKind,
    pub session_id: Option<String>,
    pub database: Option<String>,
    pub message: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    task: String,
    session_id: Option<String>,
    database: Option<String>,
    #[serde(default)]
    message: Value,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        Task {
            kind,
            session_id: None,
            database: None,
            message: Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_message(mut self, message: Value) -> Self {
        self.message = message;
        self
    }

    /// Parse the wire shape `{task, sessionId, database, message}`.
    pub fn from_value(value: &Value) -> Result<Self, DbrelayError> {
        let raw: RawTask =
            serde_json::from_value(value.clone()).map_err(|e| DbrelayError::Config {
                message: format!("malformed task message: {}", e),
            })?;
        Ok(Task {
            kind: raw.task.parse()?,
            session_id: raw.session_id,
            database: raw.database,
            message: raw.message,
        })
    }
}

/// Owns the session registry and one connection manager per family, and maps
/// each task to its call chain. Each task yields exactly one payload.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    relational: RelationalManager,
    elastic: ElasticManager,
    objectstore: ObjectStoreManager,
    drill: DrillManager,
    headless_config: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, headless_config: Option<PathBuf>) -> Self {
        Dispatcher {
            relational: RelationalManager::new(registry.clone()),
            elastic: ElasticManager::new(registry.clone()),
            objectstore: ObjectStoreManager::new(registry.clone()),
            drill: DrillManager::new(registry.clone()),
            registry,
            headless_config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn manager_for(&self, family: Family) -> &dyn ConnectionManager {
        match family {
            Family::Relational => &self.relational,
            Family::Elasticsearch => &self.elastic,
            Family::ObjectStore => &self.objectstore,
            Family::ApacheDrill => &self.drill,
        }
    }

    /// Session id for tasks that operate on an existing session: explicit id
    /// from the task, else the registry's current one. An explicit id only
    /// shadows the selection for this task; it never changes which session
    /// is current.
    fn resolve_session(&self, task: &Task) -> Result<String, DbrelayError> {
        match &task.session_id {
            Some(id) => Ok(id.clone()),
            None => self.registry.current().ok_or(DbrelayError::AppNotConnected),
        }
    }

    async fn dialect_of(&self, session_id: &str) -> Result<Dialect, DbrelayError> {
        let slot = self
            .registry
            .get(session_id)
            .ok_or(DbrelayError::AppNotConnected)?;
        let session = slot.lock().await;
        Ok(session.dialect)
    }

    async fn manager_of(
        &self,
        session_id: &str,
    ) -> Result<&dyn ConnectionManager, DbrelayError> {
        let dialect = self.dialect_of(session_id).await?;
        Ok(self.manager_for(dialect.family()))
    }

    /// Connection configuration for a CONNECT: read from the headless config
    /// file when one was given, otherwise taken from the task message.
    fn connect_config(&self, session_id: &str, task: &Task)
        -> Result<ConnectionConfig, DbrelayError> {
        match &self.headless_config {
            Some(path) => config::headless_config_for(path, session_id),
            None => ConnectionConfig::from_message(&task.message),
        }
    }

    /// Smallest non-negative integer not yet used as a session id.
    fn next_session_id(&self) -> String {
        let taken: Vec<u64> = self
            .registry
            .ids()
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        let mut candidate = 0u64;
        while taken.contains(&candidate) {
            candidate += 1;
        }
        candidate.to_string()
    }

    async fn connect(&self, task: &Task) -> Result<String, DbrelayError> {
        let session_id = task
            .session_id
            .clone()
            .or_else(|| self.registry.current())
            .unwrap_or_else(|| "0".to_string());

        let config = self.connect_config(&session_id, task)?;

        // The message-supplied dialect only applies to a never-seen id; an
        // existing session keeps the dialect it was declared with, and a
        // config naming another one is rejected before any handle is built.
        let slot = self.registry.ensure_session(&session_id, config.dialect);
        let dialect = slot.lock().await.dialect;
        if dialect != config.dialect {
            return Err(DbrelayError::Config {
                message: format!(
                    "session '{}' is bound to dialect [{}], not [{}]",
                    session_id, dialect, config.dialect
                ),
            });
        }
        self.registry.set_current(&session_id);

        self.manager_for(dialect.family())
            .connect(&session_id, config)
            .await?;
        Ok(session_id)
    }

    async fn add_session(&self, task: &Task) -> Result<Value, DbrelayError> {
        let dialect_name = task
            .message
            .get("dialect")
            .and_then(Value::as_str)
            .ok_or_else(|| DbrelayError::ParameterMissing(error::DIALECT_PARAM.to_string()))?;
        let dialect: Dialect = dialect_name.parse()?;

        let database = task.database.clone().or_else(|| {
            task.message
                .get("database")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        let session_id = task
            .session_id
            .clone()
            .unwrap_or_else(|| self.next_session_id());

        info!(session = %session_id, dialect = %dialect, "registering session");
        self.registry.add_session(&session_id, dialect, database).await;
        self.registry.set_current(&session_id);
        Ok(self.registry.list_sessions().await)
    }

    async fn delete_session(&self, task: &Task) -> Result<Value, DbrelayError> {
        let session_id = task
            .session_id
            .as_deref()
            .ok_or_else(|| DbrelayError::ParameterMissing(error::SESSION_PARAM.to_string()))?;

        if !self.registry.delete_session(session_id) {
            return Err(DbrelayError::SessionNotFound);
        }
        info!(session = session_id, "session deleted");
        Ok(self.registry.list_sessions().await)
    }

    fn requested_tables(task: &Task) -> Result<Vec<String>, DbrelayError> {
        let tables: Vec<String> = match &task.message {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Value::String(csv) => csv
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if tables.is_empty() {
            return Err(DbrelayError::ParameterMissing(error::TABLES_PARAM.to_string()));
        }
        Ok(tables)
    }

    /// Run one task to completion. The single `Result` is the response: the
    /// first failing chain step short-circuits the rest, so at most one error
    /// is ever reported per task.
    pub async fn dispatch(&self, task: Task) -> Result<Value, DbrelayError> {
        match task.kind {
            TaskKind::Sessions => Ok(self.registry.list_sessions().await),
            TaskKind::AddSession => self.add_session(&task).await,
            TaskKind::DeleteSession => self.delete_session(&task).await,

            TaskKind::Connect => {
                self.connect(&task).await?;
                Ok(json!({ "error": null }))
            }

            TaskKind::Authenticate => {
                let id = self.resolve_session(&task)?;
                self.manager_of(&id).await?.authenticate(&id).await?;
                Ok(json!({ "error": null }))
            }

            TaskKind::SelectDatabase => {
                let id = self.resolve_session(&task)?;
                let database = task.database.as_deref().ok_or_else(|| {
                    DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string())
                })?;
                self.manager_of(&id).await?.select_database(&id, database).await?;
                Ok(json!({ "error": null }))
            }

            TaskKind::Databases => {
                let id = self.resolve_session(&task)?;
                let manager = self.manager_of(&id).await?;
                manager.authenticate(&id).await?;
                manager.list_databases(&id).await
            }

            TaskKind::Tables => {
                let id = self.resolve_session(&task)?;
                let manager = self.manager_of(&id).await?;
                manager.authenticate(&id).await?;
                if let Some(database) = task.database.as_deref() {
                    manager.select_database(&id, database).await?;
                }
                manager.list_tables(&id).await
            }

            TaskKind::Preview => {
                let tables = Self::requested_tables(&task)?;
                let id = self.resolve_session(&task)?;
                let manager = self.manager_of(&id).await?;
                manager.authenticate(&id).await?;
                if let Some(database) = task.database.as_deref() {
                    manager.select_database(&id, database).await?;
                }
                manager.preview_tables(&id, &tables).await
            }

            TaskKind::Query => {
                let id = self.resolve_session(&task)?;
                let manager = self.manager_of(&id).await?;
                manager.authenticate(&id).await?;
                if let Some(database) = task.database.as_deref() {
                    manager.select_database(&id, database).await?;
                }
                manager.send_raw_query(&id, &task.message).await
            }

            TaskKind::Disconnect => {
                let id = self.resolve_session(&task)?;
                self.manager_of(&id).await?.disconnect(&id).await
            }

            TaskKind::ConnectAndShowDatabases => {
                let id = self.connect(&task).await?;
                self.manager_of(&id).await?.list_databases(&id).await
            }

            TaskKind::CheckConnectionAndShowDatabases => {
                let id = self.resolve_session(&task)?;
                let manager = self.manager_of(&id).await?;
                manager.authenticate(&id).await?;
                manager.list_databases(&id).await
            }

            TaskKind::SelectDatabaseAndShowTables => {
                let id = self.resolve_session(&task)?;
                let database = task.database.as_deref().ok_or_else(|| {
                    DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string())
                })?;
                let manager = self.manager_of(&id).await?;
                manager.select_database(&id, database).await?;
                manager.list_tables(&id).await
            }
        }
    }

    /// Like `dispatch`, but folds the error into the payload, so transports
    /// always have a body to send.
    pub async fn dispatch_to_payload(&self, task: Task) -> (bool, Value) {
        match self.dispatch(task).await {
            Ok(payload) => (true, payload),
            Err(e) => (false, e.to_payload()),
        }
    }
}
