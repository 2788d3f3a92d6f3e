//! Connector for SQL engines: mysql, mariadb, postgres, redshift, mssql and
//! sqlite. The mysql/postgres/sqlite families run over sqlx pools; SQL
//! Server runs over a TDS client.

use crate::config::ConnectionConfig;
use crate::connector::ConnectionHandle;
use crate::dialect::Dialect;
use crate::error::DbrelayError;
use crate::tabular::TabularResult;
use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column, Row};
use std::fmt;
use std::sync::Arc;
use tiberius::{AuthMethod, ColumnData, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const POOL_SIZE: u32 = 4;

/// SQL Server handle. The TDS client requires exclusive access per query,
/// so it lives behind an async mutex.
#[derive(Clone)]
pub struct MssqlHandle {
    client: Arc<Mutex<tiberius::Client<Compat<TcpStream>>>>,
    database: Option<String>,
}

impl MssqlHandle {
    pub async fn close(self) {
        match Arc::try_unwrap(self.client) {
            Ok(mutex) => {
                let _ = mutex.into_inner().close().await;
            }
            // A clone still runs a query against this client; it cannot be
            // shut down yet.
            Err(_) => warn!("close did not complete: mssql handle still in use"),
        }
    }
}

impl fmt::Debug for MssqlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlHandle")
            .field("database", &self.database)
            .finish()
    }
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

/// Open a new handle bound to `config.database` (or the sqlite storage
/// path). Redshift runs over the postgres driver with ssl forced on; mssql
/// always encrypts its channel.
pub async fn connect(config: &ConnectionConfig) -> Result<ConnectionHandle, DbrelayError> {
    let host = config.host.as_deref().unwrap_or("localhost");
    let username = config.username.as_deref().unwrap_or("");
    let password = config.password.as_ref().map(|p| p.expose_secret().as_str());

    match config.dialect {
        Dialect::Mysql | Dialect::Mariadb => {
            let mut options = MySqlConnectOptions::new()
                .host(host)
                .username(username)
                .ssl_mode(if config.ssl {
                    MySqlSslMode::Required
                } else {
                    MySqlSslMode::Preferred
                });
            if let Some(port) = config.port {
                options = options.port(port);
            }
            if let Some(password) = password {
                options = options.password(password);
            }
            if let Some(database) = &config.database {
                options = options.database(database);
            }
            let pool = MySqlPoolOptions::new()
                .max_connections(POOL_SIZE)
                .connect_with(options)
                .await
                .map_err(connection_error)?;
            Ok(ConnectionHandle::MySql(pool))
        }

        Dialect::Postgres | Dialect::Redshift => {
            let ssl = config.ssl || config.dialect == Dialect::Redshift;
            let mut options = PgConnectOptions::new()
                .host(host)
                .username(username)
                .ssl_mode(if ssl {
                    PgSslMode::Require
                } else {
                    PgSslMode::Prefer
                });
            if let Some(port) = config.port {
                options = options.port(port);
            }
            if let Some(password) = password {
                options = options.password(password);
            }
            if let Some(database) = &config.database {
                options = options.database(database);
            }
            let pool = PgPoolOptions::new()
                .max_connections(POOL_SIZE)
                .connect_with(options)
                .await
                .map_err(connection_error)?;
            Ok(ConnectionHandle::Postgres(pool))
        }

        Dialect::Sqlite => {
            let storage = config
                .storage
                .as_deref()
                .or(config.database.as_deref())
                .ok_or_else(|| DbrelayError::Config {
                    message: "no storage path supplied for sqlite".to_string(),
                })?;
            let options = SqliteConnectOptions::new().filename(storage);
            let pool = SqlitePoolOptions::new()
                .max_connections(POOL_SIZE)
                .connect_with(options)
                .await
                .map_err(connection_error)?;
            Ok(ConnectionHandle::Sqlite(pool))
        }

        Dialect::Mssql => {
            let mut tds = tiberius::Config::new();
            tds.host(host);
            tds.port(config.port.unwrap_or(1433));
            if let Some(database) = &config.database {
                tds.database(database);
            }
            tds.authentication(AuthMethod::sql_server(username, password.unwrap_or("")));
            tds.encryption(EncryptionLevel::Required);
            tds.trust_cert();

            let tcp = TcpStream::connect(tds.get_addr())
                .await
                .map_err(connection_error)?;
            tcp.set_nodelay(true).map_err(connection_error)?;
            let client = tiberius::Client::connect(tds, tcp.compat_write())
                .await
                .map_err(connection_error)?;

            Ok(ConnectionHandle::Mssql(MssqlHandle {
                client: Arc::new(Mutex::new(client)),
                database: config.database.clone(),
            }))
        }

        other => Err(DbrelayError::UnsupportedDialect(other.to_string())),
    }
}

/// Validate that the handle still answers. Used by `authenticate`.
pub async fn ping(handle: &ConnectionHandle) -> Result<(), DbrelayError> {
    match handle {
        ConnectionHandle::MySql(pool) => {
            sqlx::query("SELECT 1").execute(pool).await.map_err(connection_error)?;
        }
        ConnectionHandle::Postgres(pool) => {
            sqlx::query("SELECT 1").execute(pool).await.map_err(connection_error)?;
        }
        ConnectionHandle::Sqlite(pool) => {
            sqlx::query("SELECT 1").execute(pool).await.map_err(connection_error)?;
        }
        ConnectionHandle::Mssql(handle) => {
            let mut client = handle.client.lock().await;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(connection_error)?
                .into_results()
                .await
                .map_err(connection_error)?;
        }
        other => {
            return Err(DbrelayError::Connection {
                message: format!("not a relational handle: {:?}", other),
            })
        }
    }
    Ok(())
}

/// Execute a literal SQL statement and normalize the result set.
pub async fn query(handle: &ConnectionHandle, statement: &str) -> Result<TabularResult, DbrelayError> {
    match handle {
        ConnectionHandle::MySql(pool) => {
            let rows = sqlx::query(statement)
                .fetch_all(pool)
                .await
                .map_err(query_error)?;
            let Some(first) = rows.first() else {
                return Ok(TabularResult::new(vec![], vec![]));
            };
            let columnnames: Vec<String> =
                first.columns().iter().map(|c| c.name().to_string()).collect();
            let data = rows
                .iter()
                .map(|row| (0..columnnames.len()).map(|i| mysql_cell(row, i)).collect())
                .collect();
            Ok(TabularResult::new(columnnames, data))
        }

        ConnectionHandle::Postgres(pool) => {
            let rows = sqlx::query(statement)
                .fetch_all(pool)
                .await
                .map_err(query_error)?;
            let Some(first) = rows.first() else {
                return Ok(TabularResult::new(vec![], vec![]));
            };
            let columnnames: Vec<String> =
                first.columns().iter().map(|c| c.name().to_string()).collect();
            let data = rows
                .iter()
                .map(|row| (0..columnnames.len()).map(|i| pg_cell(row, i)).collect())
                .collect();
            Ok(TabularResult::new(columnnames, data))
        }

        ConnectionHandle::Sqlite(pool) => {
            let rows = sqlx::query(statement)
                .fetch_all(pool)
                .await
                .map_err(query_error)?;
            let Some(first) = rows.first() else {
                return Ok(TabularResult::new(vec![], vec![]));
            };
            let columnnames: Vec<String> =
                first.columns().iter().map(|c| c.name().to_string()).collect();
            let data = rows
                .iter()
                .map(|row| (0..columnnames.len()).map(|i| sqlite_cell(row, i)).collect())
                .collect();
            Ok(TabularResult::new(columnnames, data))
        }

        ConnectionHandle::Mssql(handle) => {
            let mut client = handle.client.lock().await;
            let rows = client
                .simple_query(statement)
                .await
                .map_err(query_error)?
                .into_first_result()
                .await
                .map_err(query_error)?;
            let Some(first) = rows.first() else {
                return Ok(TabularResult::new(vec![], vec![]));
            };
            let columnnames: Vec<String> =
                first.columns().iter().map(|c| c.name().to_string()).collect();
            let data = rows
                .into_iter()
                .map(|row| row.into_iter().map(tds_cell).collect())
                .collect();
            Ok(TabularResult::new(columnnames, data))
        }

        other => Err(DbrelayError::Query {
            message: format!("not a relational handle: {:?}", other),
        }),
    }
}

fn mysql_cell(row: &sqlx::mysql::MySqlRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

fn pg_cell(row: &sqlx::postgres::PgRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

fn sqlite_cell(row: &sqlx::sqlite::SqliteRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

fn tds_cell(cell: ColumnData<'static>) -> Value {
    match cell {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| Value::String(n.to_string()))
            .unwrap_or(Value::Null),
        // Temporal and binary types are not decoded.
        _ => Value::Null,
    }
}

/// Preset "show databases" query per dialect. Sqlite has no multi-database
/// concept and is handled by the manager before this point.
pub fn show_databases_query(dialect: Dialect) -> Result<String, DbrelayError> {
    match dialect {
        Dialect::Mysql | Dialect::Mariadb => Ok("SHOW DATABASES".to_string()),
        Dialect::Postgres | Dialect::Redshift => Ok(
            "SELECT datname AS database FROM pg_database WHERE datistemplate = false".to_string(),
        ),
        Dialect::Mssql => Ok("SELECT name FROM Sys.Databases".to_string()),
        other => Err(DbrelayError::Config {
            message: format!("could not build a preset query for dialect [{}]", other),
        }),
    }
}

/// Preset "show tables" query per dialect.
pub fn show_tables_query(dialect: Dialect) -> Result<String, DbrelayError> {
    match dialect {
        Dialect::Mysql | Dialect::Mariadb => Ok("SHOW TABLES".to_string()),
        Dialect::Postgres | Dialect::Redshift => Ok(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'"
                .to_string(),
        ),
        Dialect::Mssql => Ok("SELECT TABLE_NAME FROM information_schema.tables".to_string()),
        Dialect::Sqlite => {
            Ok("SELECT name FROM sqlite_master WHERE type = 'table'".to_string())
        }
        other => Err(DbrelayError::Config {
            message: format!("could not build a preset query for dialect [{}]", other),
        }),
    }
}

/// Preset bounded preview query per dialect.
pub fn show_top5_query(
    dialect: Dialect,
    database: Option<&str>,
    table: &str,
) -> Result<String, DbrelayError> {
    match dialect {
        Dialect::Mysql | Dialect::Mariadb | Dialect::Postgres | Dialect::Redshift
        | Dialect::Sqlite => Ok(format!("SELECT * FROM {} LIMIT 5", table)),
        Dialect::Mssql => {
            let database = database.ok_or_else(|| DbrelayError::Config {
                message: "no database selected for mssql preview".to_string(),
            })?;
            Ok(format!("SELECT TOP 5 * FROM {}.dbo.{}", database, table))
        }
        other => Err(DbrelayError::Config {
            message: format!("could not build a preset query for dialect [{}]", other),
        }),
    }
}
