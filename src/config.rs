use crate::dialect::Dialect;
use crate::error::DbrelayError;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;

/// Connection credentials for one session, supplied either with a CONNECT
/// task or read from the headless-mode config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient_port")]
    pub port: Option<u16>,
    pub database: Option<String>,
    /// File path of the database, for storage-backed engines (sqlite).
    pub storage: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ssl: bool,
    // Object-store fields (s3).
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<SecretString>,
    pub bucket: Option<String>,
}

impl ConnectionConfig {
    pub fn from_message(message: &serde_json::Value) -> Result<Self, DbrelayError> {
        serde_json::from_value(message.clone()).map_err(|e| DbrelayError::Config {
            message: format!("invalid connection configuration: {}", e),
        })
    }

    /// Database the resulting handle will be bound to. Storage-backed
    /// engines treat the file path as the database.
    pub fn initial_database(&self) -> Option<String> {
        match self.dialect {
            Dialect::Sqlite => self.storage.clone().or_else(|| self.database.clone()),
            Dialect::S3 => self.bucket.clone(),
            _ => self.database.clone(),
        }
    }
}

/// Query-string parameters arrive as strings; accept both forms.
fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(port)) => Ok(Some(port)),
        Some(Port::Text(text)) if text.is_empty() => Ok(None),
        Some(Port::Text(text)) => text
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Flag::Bool(flag)) => Ok(flag),
        Some(Flag::Text(text)) => Ok(text.eq_ignore_ascii_case("true") || text == "1"),
    }
}

/// Parse the headless-mode YAML config file: a map from session id to a
/// connection configuration.
pub fn load_headless_file(path: &Path) -> Result<HashMap<String, ConnectionConfig>, DbrelayError> {
    let content = std::fs::read_to_string(path).map_err(|e| DbrelayError::Config {
        message: format!("cannot read config file {}: {}", path.display(), e),
    })?;

    serde_yaml::from_str(&content).map_err(|e| DbrelayError::Config {
        message: format!("invalid config file {}: {}", path.display(), e),
    })
}

/// Look up the stored configuration for one session id.
pub fn headless_config_for(path: &Path, session_id: &str) -> Result<ConnectionConfig, DbrelayError> {
    let mut configs = load_headless_file(path)?;
    configs
        .remove(session_id)
        .ok_or_else(|| DbrelayError::Config {
            message: format!(
                "no connection configuration for session '{}' in {}",
                session_id,
                path.display()
            ),
        })
}
