//! Elasticsearch connector. Talks to the cluster's HTTP API with basic
//! auth; indices play the role of databases and mapping types the role of
//! tables.

use crate::config::ConnectionConfig;
use crate::error::DbrelayError;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ElasticHandle {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl fmt::Debug for ElasticHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticHandle")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ElasticHandle {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.username {
            Some(username) => builder.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret().as_str()),
            ),
            None => builder,
        }
    }
}

fn connection_error(e: impl fmt::Display) -> DbrelayError {
    DbrelayError::Connection {
        message: format!("An error occured when connecting to elasticsearch: {}", e),
    }
}

fn query_error(e: impl fmt::Display) -> DbrelayError {
    DbrelayError::Query {
        message: e.to_string(),
    }
}

pub fn build(config: &ConnectionConfig) -> ElasticHandle {
    let host = config.host.as_deref().unwrap_or("localhost");
    let base_url = if host.starts_with("http://") || host.starts_with("https://") {
        match config.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    } else {
        format!("http://{}:{}", host, config.port.unwrap_or(9200))
    };

    ElasticHandle {
        client: Client::new(),
        base_url,
        username: config.username.clone(),
        password: config.password.clone(),
    }
}

/// Ping the cluster root. Bounded by the driver-level 10s timeout.
pub async fn ping(handle: &ElasticHandle) -> Result<(), DbrelayError> {
    let response = handle
        .request(Method::GET, "/")
        .timeout(PING_TIMEOUT)
        .send()
        .await
        .map_err(connection_error)?;

    if !response.status().is_success() {
        return Err(connection_error(format!("HTTP {}", response.status())));
    }
    Ok(())
}

/// Fetch the full index mapping: index names key the outer map, mapping
/// types key each index's `mappings` object.
pub async fn mappings(handle: &ElasticHandle) -> Result<Map<String, Value>, DbrelayError> {
    let response = handle
        .request(Method::GET, "/_all/_mapping")
        .send()
        .await
        .map_err(connection_error)?;

    if !response.status().is_success() {
        return Err(query_error(format!("HTTP {}", response.status())));
    }

    let body: Value = response.json().await.map_err(query_error)?;
    match body {
        Value::Object(map) => Ok(map),
        other => Err(query_error(format!("unexpected mapping shape: {}", other))),
    }
}

/// Run a bounded match_all search against one index/type and return the
/// raw hits.
pub async fn search(
    handle: &ElasticHandle,
    index: &str,
    doc_type: &str,
    size: usize,
) -> Result<Vec<Value>, DbrelayError> {
    let path = format!("/{}/{}/_search", index, doc_type);
    let body = json!({ "query": { "match_all": {} }, "size": size });
    execute_search(handle, &path, &body).await
}

/// Resolve the search path and body for a raw query. String messages carry
/// the search as JSON text and must parse; object messages either address an
/// index/type explicitly (`index`/`type`/`body` fields, mirroring the
/// driver's search call shape) or are taken verbatim as the search body.
pub fn search_request(message: &Value) -> Result<(String, Value), DbrelayError> {
    let message = match message {
        Value::String(text) => {
            serde_json::from_str(text).map_err(|e| DbrelayError::Query {
                message: format!("invalid search statement: {}", e),
            })?
        }
        other => other.clone(),
    };

    let Value::Object(map) = message else {
        return Err(DbrelayError::Query {
            message: "search statement must be a JSON object".to_string(),
        });
    };

    if map.contains_key("index") || map.contains_key("type") || map.contains_key("body") {
        let index = map.get("index").and_then(Value::as_str).unwrap_or("_all");
        let body = map.get("body").cloned().unwrap_or_else(|| json!({}));
        let path = match map.get("type").and_then(Value::as_str) {
            Some(doc_type) => format!("/{}/{}/_search", index, doc_type),
            None => format!("/{}/_search", index),
        };
        Ok((path, body))
    } else {
        // A bare search body addresses every index.
        Ok(("/_all/_search".to_string(), Value::Object(map)))
    }
}

/// Run a caller-supplied query against the cluster.
pub async fn search_raw(
    handle: &ElasticHandle,
    message: &Value,
) -> Result<Vec<Value>, DbrelayError> {
    let (path, body) = search_request(message)?;
    execute_search(handle, &path, &body).await
}

async fn execute_search(
    handle: &ElasticHandle,
    path: &str,
    body: &Value,
) -> Result<Vec<Value>, DbrelayError> {
    let response = handle
        .request(Method::POST, path)
        .json(body)
        .send()
        .await
        .map_err(connection_error)?;

    if !response.status().is_success() {
        return Err(query_error(format!("HTTP {}", response.status())));
    }

    let body: Value = response.json().await.map_err(query_error)?;
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(hits)
}
