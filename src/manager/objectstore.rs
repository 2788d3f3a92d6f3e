//! Connection manager for object stores (S3). The bucket is the database,
//! its keys are the tables, and querying a key parses the file as CSV.

use super::{
    cleared_payload, close_handle, live_handle, preview_entry, previews_payload, query_payload,
    session_slot, tables_payload, ConnectionManager,
};
use crate::config::ConnectionConfig;
use crate::connector::{s3, ConnectionHandle};
use crate::error::{self, DbrelayError};
use crate::registry::SessionRegistry;
use crate::tabular::{self, TabularResult};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct ObjectStoreManager {
    registry: Arc<SessionRegistry>,
}

impl ObjectStoreManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        ObjectStoreManager { registry }
    }
}

fn auth_error(e: DbrelayError) -> DbrelayError {
    DbrelayError::AuthenticationFailed(e.to_string())
}

fn s3_handle(handle: &ConnectionHandle) -> Result<&s3::S3Handle, DbrelayError> {
    match handle {
        ConnectionHandle::S3(inner) => Ok(inner),
        other => Err(DbrelayError::Connection {
            message: format!("not an object-store handle: {:?}", other),
        }),
    }
}

/// Bound a CSV table to its first five data rows.
fn head(result: TabularResult) -> TabularResult {
    let mut rows = result.rows;
    rows.truncate(5);
    TabularResult::new(result.columnnames, rows)
}

#[async_trait]
impl ConnectionManager for ObjectStoreManager {
    async fn connect(&self, session_id: &str, config: ConnectionConfig)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        let inner = s3::build(&config)?;
        info!(session = session_id, bucket = %inner.bucket, "connecting to s3");
        s3::probe(&inner).await.map_err(auth_error)?;

        session.active_database = Some(inner.bucket.clone());
        session.config = Some(config);
        if let Some(old) = session.replace_handle(ConnectionHandle::S3(inner)) {
            close_handle(session_id, old).await;
        }
        Ok(())
    }

    async fn authenticate(&self, session_id: &str) -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        s3::probe(s3_handle(&handle)?).await.map_err(auth_error)
    }

    async fn select_database(&self, session_id: &str, database: &str)
        -> Result<(), DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let mut session = slot.lock().await;

        // Switching buckets rebuilds the handle with the same credentials.
        if session.active_database.as_deref() != Some(database) {
            let mut config = session.config.clone().ok_or(DbrelayError::AppNotConnected)?;
            config.bucket = Some(database.to_string());
            let inner = s3::build(&config)?;
            session.active_database = Some(database.to_string());
            session.config = Some(config);
            if let Some(old) = session.replace_handle(ConnectionHandle::S3(inner)) {
                close_handle(session_id, old).await;
            }
        }

        let handle = session.handle.clone().ok_or(DbrelayError::AppNotConnected)?;
        s3::probe(s3_handle(&handle)?).await.map_err(auth_error)
    }

    async fn list_databases(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        let bucket = s3_handle(&handle)?.bucket.clone();
        Ok(super::databases_payload(vec![bucket]))
    }

    async fn list_tables(&self, session_id: &str) -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        let keys = s3::list_files(s3_handle(&handle)?).await?;
        Ok(tables_payload(keys))
    }

    async fn preview_tables(&self, session_id: &str, tables: &[String])
        -> Result<Value, DbrelayError> {
        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;
        let inner = s3_handle(&handle)?;

        let previews = join_all(tables.iter().map(|key| async move {
            let result = s3::fetch_key(inner, key)
                .await
                .map(|text| head(tabular::from_csv(&text)));
            (key.clone(), result)
        }))
        .await;

        let entries = previews
            .into_iter()
            .map(|(key, result)| preview_entry(&key, result))
            .collect();
        Ok(previews_payload(entries))
    }

    async fn send_raw_query(&self, session_id: &str, message: &Value)
        -> Result<Value, DbrelayError> {
        let key = message
            .as_str()
            .ok_or_else(|| DbrelayError::ParameterMissing(error::QUERY_PARAM.to_string()))?;

        let slot = session_slot(&self.registry, session_id)?;
        let handle = live_handle(&slot).await?;

        info!(session = session_id, key, "downloading object");
        let text = s3::fetch_key(s3_handle(&handle)?, key).await?;
        Ok(query_payload(tabular::from_csv(&text)))
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
