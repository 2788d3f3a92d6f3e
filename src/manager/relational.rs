//! Connection manager for the SQL dialect family.

use super::{
    close_handle, databases_payload, cleared_payload, first_column, live_handle, preview_entry,
    previews_payload, query_payload, session_slot, tables_payload, ConnectionManager,
};
use crate::config::ConnectionConfig;
use crate::connector::{relational, ConnectionHandle};
use crate::dialect::Dialect;
use crate::error::{self, DbrelayError};
use crate::registry::SessionRegistry;
use crate::tabular::TabularResult;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RelationalManager {
    registry: Arc<SessionRegistry>,
}

impl RelationalManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        RelationalManager { registry }
    }

    async fn table_names(
        &self,
        dialect: Dialect,
        handle: &ConnectionHandle,
    ) -> Result<Vec<String>, DbrelayError> {
        let statement = relational::show_tables_query(dialect)?;
        debug!(query = %statement, "querying");
        let result = relational::query(handle, &statement).await?;
        Ok(first_column(&result))
    }

    async fn preview_one(
        dialect: Dialect,
        handle: ConnectionHandle,
        database: Option<String>,
        table: String,
    ) -> (String, Result<TabularResult, DbrelayError>) {
        let result = match relational::show_top5_query(dialect, database.as_deref(), &table) {
            Ok(statement) => relational::query(&handle, &statement).await,
            Err(e) => Err(e),
        };
        (table, result)
    }
}

fn auth_error(e: DbrelayError) -> DbrelayError {
    DbrelayError::AuthenticationFailed(e.to_string())
}

#[async_trait]
impl ConnectionManager for RelationalManager {
    async fn connect(&self, session_id: &str, config: ConnectionConfig)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        info!(
            session = session_id,
            user = config.username.as_deref().unwrap_or(""),
            "creating a connection"
        );

        let handle = relational::connect(&config).await.map_err(auth_error)?;
        relational::ping(&handle).await.map_err(auth_error)?;

        session.active_database = config.initial_database();
        session.config = Some(config);
        if let Some(old) = session.replace_handle(handle) {
            close_handle(session_id, old).await;
        }
        Ok(())
    }

    async fn authenticate(&self, session_id: &str) -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        relational::ping(&handle).await.map_err(auth_error)
    }

    async fn select_database(&self, session_id: &str, database: &str)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        // Rebuild the handle only when actually switching; the client is
        // bound to one database, so a switch means a replacement.
        if session.active_database.as_deref() != Some(database) {
            let mut config = session.config.clone().ok_or(DbrelayError::AppNotConnected)?;
            match config.dialect {
                Dialect::Sqlite => config.storage = Some(database.to_string()),
                _ => config.database = Some(database.to_string()),
            }

            info!(session = session_id, database, "switching to a new database");
            let handle = relational::connect(&config).await.map_err(auth_error)?;
            session.active_database = Some(database.to_string());
            session.config = Some(config);
            if let Some(old) = session.replace_handle(handle) {
                close_handle(session_id, old).await;
            }
        }

        let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
        relational::ping(&handle).await.map_err(auth_error)
    }

    async fn list_databases(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (dialect, handle) = {
            let session = slot.lock().await;
            let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
            (session.dialect, handle)
        };

        // Sqlite has no databases list: report a constant placeholder and
        // go straight to the table listing.
        if dialect == Dialect::Sqlite {
            let tables: Vec<Value> = self
                .table_names(dialect, &handle)
                .await?
                .into_iter()
                .map(|name| json!({ name: {} }))
                .collect();
            return Ok(json!({
                "databases": ["SQLITE database accessed"],
                "error": null,
                "tables": tables,
            }));
        }

        let statement = relational::show_databases_query(dialect)?;
        debug!(query = %statement, "querying");
        let result = relational::query(&handle, &statement).await?;
        Ok(databases_payload(first_column(&result)))
    }

    async fn list_tables(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (dialect, handle) = {
            let session = slot.lock().await;
            let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
            (session.dialect, handle)
        };
        let names = self.table_names(dialect, &handle).await?;
        Ok(tables_payload(names))
    }

    async fn preview_tables(&self, session_id: &str, tables: &[String])
        -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (dialect, handle, database) = {
            let session = slot.lock().await;
            let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
            (session.dialect, handle, session.active_database.clone())
        };

        let previews = join_all(tables.iter().map(|table| {
            Self::preview_one(dialect, handle.clone(), database.clone(), table.clone())
        }))
        .await;

        let entries = previews
            .into_iter()
            .map(|(table, result)| preview_entry(&table, result))
            .collect();
        Ok(previews_payload(entries))
    }

    async fn send_raw_query(&self, session_id: &str, message: &Value)
        -> Result<Value, DbrelayError> {
        let statement = message
            .as_str()
            .ok_or_else(|| DbrelayError::ParameterMissing(error::QUERY_PARAM.to_string()))?;

        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;

        info!(session = session_id, query = statement, "executing query");
        let result = relational::query(&handle, statement).await?;
        Ok(query_payload(result))
    }

    async fn disconnect(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = {
            let mut session = slot.lock().await;
            session.handle.take().ok_or(DbrelayError::AppNotConnected)?
        };

        info!(session = session_id, "disconnecting");
        close_handle(session_id, handle).await;
        Ok(cleared_payload())
    }
}
