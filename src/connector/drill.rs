//! Apache Drill connector. Queries go through Drill's REST API; storage
//! plugins play the role of databases and their files the role of tables.

use crate::config::ConnectionConfig;
use crate::error::DbrelayError;
use crate::tabular::{self, TabularResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

#[derive(Clone)]
pub struct DrillHandle {
    client: Client,
    base_url: String,
}

impl fmt::Debug for DrillHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrillHandle")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Value>,
}

#[derive(Deserialize)]
struct StoragePlugin {
    name: String,
    #[serde(default)]
    config: StoragePluginConfig,
}

#[derive(Deserialize, Default)]
struct StoragePluginConfig {
    #[serde(default)]
    enabled: bool,
}

fn connection_error(e: impl fmt::Display) -> DbrelayError {
    DbrelayError::Connection {
        message: e.to_string(),
    }
}

fn query_error(e: impl fmt::Display) -> DbrelayError {
    DbrelayError::Query {
        message: e.to_string(),
    }
}

pub fn build(config: &ConnectionConfig) -> DrillHandle {
    let host = config.host.as_deref().unwrap_or("localhost");
    let base_url = if host.starts_with("http://") || host.starts_with("https://") {
        match config.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    } else {
        format!("http://{}:{}", host, config.port.unwrap_or(8047))
    };

    DrillHandle {
        client: Client::new(),
        base_url,
    }
}

/// Validate the drillbit is reachable.
pub async fn probe(handle: &DrillHandle) -> Result<(), DbrelayError> {
    let url = format!("{}/storage.json", handle.base_url);
    let response = handle.client.get(&url).send().await.map_err(connection_error)?;
    if !response.status().is_success() {
        return Err(connection_error(format!("HTTP {}", response.status())));
    }
    Ok(())
}

/// Names of the enabled storage plugins.
pub async fn storage_plugins(handle: &DrillHandle) -> Result<Vec<String>, DbrelayError> {
    let url = format!("{}/storage.json", handle.base_url);
    let plugins: Vec<StoragePlugin> = handle
        .client
        .get(&url)
        .send()
        .await
        .map_err(connection_error)?
        .json()
        .await
        .map_err(query_error)?;

    Ok(plugins
        .into_iter()
        .filter(|plugin| plugin.config.enabled)
        .map(|plugin| plugin.name)
        .collect())
}

/// Run a SQL statement through the REST API and normalize the response.
/// Drill reports failures in-band through `errorMessage`.
pub async fn query(handle: &DrillHandle, statement: &str) -> Result<TabularResult, DbrelayError> {
    let url = format!("{}/query.json", handle.base_url);
    let response: QueryResponse = handle
        .client
        .post(&url)
        .json(&json!({ "queryType": "SQL", "query": statement }))
        .send()
        .await
        .map_err(connection_error)?
        .json()
        .await
        .map_err(query_error)?;

    if let Some(message) = response.error_message {
        return Err(DbrelayError::Query { message });
    }

    let rows = response
        .rows
        .iter()
        .map(|row| {
            response
                .columns
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(tabular::from_columns(response.columns, rows))
}
