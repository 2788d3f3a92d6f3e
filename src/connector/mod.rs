//! Dialect-specific I/O implementations. One module per connector family;
//! connectors never catch and silence errors, that is the connection
//! manager's job.

pub mod drill;
pub mod elastic;
pub mod relational;
pub mod s3;

use std::fmt;

/// A live, dialect-specific connection handle. Closed set: exactly one
/// variant is selected per session based on its dialect.
#[derive(Clone)]
pub enum ConnectionHandle {
    MySql(sqlx::MySqlPool),
    Postgres(sqlx::PgPool),
    Sqlite(sqlx::SqlitePool),
    Mssql(relational::MssqlHandle),
    Elastic(elastic::ElasticHandle),
    S3(s3::S3Handle),
    Drill(drill::DrillHandle),
}

impl ConnectionHandle {
    /// Release underlying resources. Pool-backed handles wait for the pool
    /// to drain; HTTP-backed handles hold no persistent connection state.
    pub async fn close(self) {
        match self {
            ConnectionHandle::MySql(pool) => pool.close().await,
            ConnectionHandle::Postgres(pool) => pool.close().await,
            ConnectionHandle::Sqlite(pool) => pool.close().await,
            ConnectionHandle::Mssql(handle) => handle.close().await,
            ConnectionHandle::Elastic(_)
            | ConnectionHandle::S3(_)
            | ConnectionHandle::Drill(_) => {}
        }
    }

    fn variant(&self) -> &'static str {
        match self {
            ConnectionHandle::MySql(_) => "MySql",
            ConnectionHandle::Postgres(_) => "Postgres",
            ConnectionHandle::Sqlite(_) => "Sqlite",
            ConnectionHandle::Mssql(_) => "Mssql",
            ConnectionHandle::Elastic(_) => "Elastic",
            ConnectionHandle::S3(_) => "S3",
            ConnectionHandle::Drill(_) => "Drill",
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionHandle")
            .field(&self.variant())
            .finish()
    }
}
