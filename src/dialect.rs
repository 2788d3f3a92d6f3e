use crate::error::DbrelayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The backend engine a session talks to. Fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Mysql,
    Mariadb,
    Postgres,
    Redshift,
    Mssql,
    Sqlite,
    Elasticsearch,
    S3,
    ApacheDrill,
}

/// Connector family a dialect is routed to. Closed set: routing matches
/// exhaustively and unknown dialect strings fail loudly at parse time
/// instead of falling back to the relational manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Relational,
    Elasticsearch,
    ObjectStore,
    ApacheDrill,
}

impl Dialect {
    pub fn family(self) -> Family {
        match self {
            Dialect::Mysql
            | Dialect::Mariadb
            | Dialect::Postgres
            | Dialect::Redshift
            | Dialect::Mssql
            | Dialect::Sqlite => Family::Relational,
            Dialect::Elasticsearch => Family::Elasticsearch,
            Dialect::S3 => Family::ObjectStore,
            Dialect::ApacheDrill => Family::ApacheDrill,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Mariadb => "mariadb",
            Dialect::Postgres => "postgres",
            Dialect::Redshift => "redshift",
            Dialect::Mssql => "mssql",
            Dialect::Sqlite => "sqlite",
            Dialect::Elasticsearch => "elasticsearch",
            Dialect::S3 => "s3",
            Dialect::ApacheDrill => "apache_drill",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DbrelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Dialect::Mysql),
            "mariadb" => Ok(Dialect::Mariadb),
            "postgres" => Ok(Dialect::Postgres),
            "redshift" => Ok(Dialect::Redshift),
            "mssql" => Ok(Dialect::Mssql),
            "sqlite" => Ok(Dialect::Sqlite),
            "elasticsearch" => Ok(Dialect::Elasticsearch),
            "s3" => Ok(Dialect::S3),
            "apache_drill" => Ok(Dialect::ApacheDrill),
            other => Err(DbrelayError::UnsupportedDialect(other.to_string())),
        }
    }
}
