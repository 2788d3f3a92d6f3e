use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbrelayError {
    /// A required task parameter was absent. The message carries the
    /// human-readable hint surfaced verbatim to the caller.
    #[error("{0}")]
    ParameterMissing(String),

    #[error(
        "There seems to be no connection at the moment. \
         Please try connecting the application to your database."
    )]
    AppNotConnected,

    #[error("Authentication failed. Make sure you are connected {0}")]
    AuthenticationFailed(String),

    #[error(
        "No such session entry found. Please provide a session value that \
         has been created. You can obtain the list of available sessions \
         at the endpoint /v1/sessions"
    )]
    SessionNotFound,

    #[error("Dialect [{0}] is not supported by any connection manager")]
    UnsupportedDialect(String),

    #[error("Task {0} is not implemented.")]
    TaskNotImplemented(String),

    #[error("Api version [{0}] is not implemented")]
    ApiVersionNotImplemented(String),

    #[error("connection: {message}")]
    Connection { message: String },

    #[error("query: {message}")]
    Query { message: String },

    #[error("config: {message}")]
    Config { message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DbrelayError {
    /// Wire-visible error name, used by callers to branch on error kind.
    pub fn name(&self) -> &'static str {
        match self {
            DbrelayError::ParameterMissing(_) => "ParameterMissing",
            DbrelayError::AppNotConnected
            | DbrelayError::AuthenticationFailed(_)
            | DbrelayError::Connection { .. } => "ConnectionError",
            DbrelayError::SessionNotFound => "SessionNotFound",
            DbrelayError::UnsupportedDialect(_) => "UnsupportedDialect",
            DbrelayError::TaskNotImplemented(_) => "TaskNotImplemented",
            DbrelayError::ApiVersionNotImplemented(_) => "ApiVersionNotImplemented",
            DbrelayError::Query { .. } => "QueryError",
            DbrelayError::Config { .. } => "ConfigError",
            DbrelayError::Io(_) => "IoError",
        }
    }

    /// The single error payload shape delivered through the response path.
    pub fn to_payload(&self) -> Value {
        json!({
            "error": {
                "message": self.to_string(),
                "name": self.name(),
            }
        })
    }
}

// Parameter hint strings, kept verbatim from the API contract.
pub const QUERY_PARAM: &str = "No query statement found. Please provide a \
     query entry such as '/query?statement=SELECT * FROM table'";
pub const DATABASE_PARAM: &str = "No database entry found. Please provide a \
     database entry such as '/endpoint?database=database_name'";
pub const TABLES_PARAM: &str = "No tables entry found. Please provide a \
     tables entry such as '/preview?tables=table1,table2'";
pub const SESSION_PARAM: &str = "No session entry found. Please provide a \
     session entry such as '/deletesession?session=sessionID'";
pub const DIALECT_PARAM: &str = "No dialect entry found. Please provide a \
     dialect entry such as '/addsession?dialect=mysql&database=plotly'";
