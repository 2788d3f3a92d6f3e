//! Connection manager for Elasticsearch. Indices stand in for databases
//! and mapping types for tables.

use super::{
    cleared_payload, close_handle, live_handle, preview_entry, previews_payload, query_payload,
    session_slot, tables_payload, ConnectionManager,
};
use crate::config::ConnectionConfig;
use crate::connector::{elastic, ConnectionHandle};
use crate::error::{self, DbrelayError};
use crate::registry::SessionRegistry;
use crate::tabular;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ElasticManager {
    registry: Arc<SessionRegistry>,
}

impl ElasticManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        ElasticManager { registry }
    }
}

fn auth_error(e: DbrelayError) -> DbrelayError {
    DbrelayError::AuthenticationFailed(e.to_string())
}

fn elastic_handle(handle: &ConnectionHandle) -> Result<&elastic::ElasticHandle, DbrelayError> {
    match handle {
        ConnectionHandle::Elastic(inner) => Ok(inner),
        other => Err(DbrelayError::Connection {
            message: format!("not an elasticsearch handle: {:?}", other),
        }),
    }
}

#[async_trait]
impl ConnectionManager for ElasticManager {
    async fn connect(&self, session_id: &str, config: ConnectionConfig)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        info!(
            session = session_id,
            host = config.host.as_deref().unwrap_or("localhost"),
            "creating a connection to elasticsearch"
        );

        let inner = elastic::build(&config);
        elastic::ping(&inner).await.map_err(auth_error)?;

        session.active_database = config.database.clone();
        session.config = Some(config);
        if let Some(old) = session.replace_handle(ConnectionHandle::Elastic(inner)) {
            close_handle(session_id, old).await;
        }
        Ok(())
    }

    async fn authenticate(&self, session_id: &str) -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        elastic::ping(elastic_handle(&handle)?).await.map_err(auth_error)
    }

    async fn select_database(&self, session_id: &str, database: &str)
        -> Result<(), DbrelayError> {
        // The client is not bound to an index; selecting a database only
        // records which index subsequent listings read.
        let slot = session_slot(&self.registry, session_id)?;
        let handle = {
            let mut session = slot.lock().await;
            session.active_database = Some(database.to_string());
            session.handle.clone().ok_or(DbrelayError::AppNotConnected)?
        };
        elastic::ping(elastic_handle(&handle)?).await.map_err(auth_error)
    }

    async fn list_databases(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;

        debug!(session = session_id, "looking up indices");
        let mappings = elastic::mappings(elastic_handle(&handle)?).await?;
        let databases: Vec<String> = mappings.keys().cloned().collect();
        Ok(super::databases_payload(databases))
    }

    async fn list_tables(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (handle, index) = {
            let session = slot.lock().await;
            let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
            let index = session.active_database.clone().ok_or_else(|| {
                DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string())
            })?;
            (handle, index)
        };

        debug!(session = session_id, index, "looking up mapping types");
        let mappings = elastic::mappings(elastic_handle(&handle)?).await?;
        let types: Vec<String> = mappings
            .get(&index)
            .and_then(|entry| entry.get("mappings"))
            .and_then(Value::as_object)
            .map(|mapping| mapping.keys().cloned().collect())
            .unwrap_or_default();
        Ok(tables_payload(types))
    }

    async fn preview_tables(&self, session_id: &str, tables: &[String])
        -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let (handle, index) = {
            let session = slot.lock().await;
            let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
            let index = session.active_database.clone().ok_or_else(|| {
                DbrelayError::ParameterMissing(error::DATABASE_PARAM.to_string())
            })?;
            (handle, index)
        };
        let inner = elastic_handle(&handle)?;

        let previews = join_all(tables.iter().map(|doc_type| {
            let index = index.clone();
            async move {
                let result = elastic::search(inner, &index, doc_type, 5)
                    .await
                    .map(|hits| tabular::from_es_hits(&hits));
                (doc_type.clone(), result)
            }
        }))
        .await;

        let entries = previews
            .into_iter()
            .map(|(doc_type, result)| preview_entry(&doc_type, result))
            .collect();
        Ok(previews_payload(entries))
    }

    async fn send_raw_query(&self, session_id: &str, message: &Value)
        -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;

        info!(session = session_id, "querying elasticsearch");
        let hits = elastic::search_raw(elastic_handle(&handle)?, message).await?;
        Ok(query_payload(tabular::from_es_hits(&hits)))
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
