//! Connection manager for Apache Drill. Enabled storage plugins stand in
//! for databases and the files they expose for tables.

use super::{
    cleared_payload, close_handle, databases_payload, first_column, live_handle, preview_entry,
    previews_payload, query_payload, session_slot, tables_payload, ConnectionManager,
};
use crate::config::ConnectionConfig;
use crate::connector::{drill, ConnectionHandle};
use crate::error::{self, DbrelayError};
use crate::registry::SessionRegistry;
use crate::tabular::TabularResult;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DrillManager {
    registry: Arc<SessionRegistry>,
}

impl DrillManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        DrillManager { registry }
    }

    async fn plugin_for(&self, slot: &crate::registry::SessionSlot)
        -> Result<(ConnectionHandle, String), DbrelayError> {
        let session = slot.lock().await;
        let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
        let plugin = session.active_database.clone().ok_or_else(|| {
            DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string())
        })?;
        Ok((handle, plugin))
    }
}

fn auth_error(e: DbrelayError) -> DbrelayError {
    DbrelayError::AuthenticationFailed(e.to_string())
}

fn drill_handle(handle: &ConnectionHandle) -> Result<&drill::DrillHandle, DbrelayError> {
    match handle {
        ConnectionHandle::Drill(inner) => Ok(inner),
        other => Err(DbrelayError::Connection {
            message: format!("not a drill handle: {:?}", other),
        }),
    }
}

async fn preview_one(
    handle: ConnectionHandle,
    plugin: String,
    table: String,
) -> (String, Result<TabularResult, DbrelayError>) {
    let result = match drill_handle(&handle) {
        Ok(inner) => {
            let statement = format!("SELECT * FROM {}.`{}` LIMIT 5", plugin, table);
            drill::query(inner, &statement).await
        }
        Err(e) => Err(e),
    };
    (table, result)
}

#[async_trait]
impl ConnectionManager for DrillManager {
    async fn connect(&self, session_id: &str, config: ConnectionConfig)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        info!(
            session = session_id,
            host = config.host.as_deref().unwrap_or("localhost"),
            "creating a connection to drill"
        );

        let inner = drill::build(&config);
        drill::probe(&inner).await.map_err(auth_error)?;

        session.active_database = config.database.clone();
        session.config = Some(config);
        if let Some(old) = session.replace_handle(ConnectionHandle::Drill(inner)) {
            close_handle(session_id, old).await;
        }
        Ok(())
    }

    async fn authenticate(&self, session_id: &str) -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        drill::probe(drill_handle(&handle)?).await.map_err(auth_error)
    }

    async fn select_database(&self, session_id: &str, database: &str)
        -> Result<(), DbrelayError> {
        // The handle talks to one drillbit regardless of plugin; selecting a
        // database only records which plugin later statements address.
        let slot = session_slot(&self.registry, session_id)?;
        let handle = {
            let mut session = slot.lock().await;
            session.active_database = Some(database.to_string());
            session.handle.clone().ok_or(DbrelayError::AppNotConnected)?
        };
        drill::probe(drill_handle(&handle)?).await.map_err(auth_error)
    }

    async fn list_databases(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;

        debug!(session = session_id, "looking up storage plugins");
        let plugins = drill::storage_plugins(drill_handle(&handle)?).await?;
        Ok(databases_payload(plugins))
    }

    async fn list_tables(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (handle, plugin) = self.plugin_for(&slot).await?;

        let statement = format!("SHOW FILES FROM `{}`", plugin);
        debug!(query = %statement, "querying");
        let result = drill::query(drill_handle(&handle)?, &statement).await?;
        Ok(tables_payload(first_column(&result)))
    }

    async fn preview_tables(&self, session_id: &str, tables: &[String])
        -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (handle, plugin) = self.plugin_for(&slot).await?;

        let previews = join_all(tables.iter().map(|table| {
            preview_one(handle.clone(), plugin.clone(), table.clone())
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
        let result = drill::query(drill_handle(&handle)?, statement).await?;
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
