use common::{is_permanent_failure, is_retryable_message};
use rowsync_core::SourceError;
use thiserror::Error;

// Server error codes we map to specific kinds.
const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_BAD_DB: u16 = 1049;
const ER_NO_SUCH_TABLE: u16 = 1146;
const ER_BAD_FIELD: u16 = 1054;

#[derive(Debug, Error)]
pub enum MySqlSourceError {
    #[error("invalid mysql dsn: {0}")]
    InvalidDsn(String),

    #[error("table `{table}` has no columns or does not exist")]
    NoSuchTable { table: String },

    #[error("driver error: {0}")]
    Driver(#[from] mysql_async::Error),
}

pub type MySqlSourceResult<T> = Result<T, MySqlSourceError>;

impl From<MySqlSourceError> for SourceError {
    fn from(e: MySqlSourceError) -> Self {
        match e {
            MySqlSourceError::InvalidDsn(msg) => SourceError::Connect {
                details: format!("invalid MySQL DSN: {msg}").into(),
            },
            MySqlSourceError::NoSuchTable { table } => SourceError::NotFound {
                details: format!("table {table}").into(),
            },
            MySqlSourceError::Driver(e) => from_driver(e),
        }
    }
}

fn from_driver(e: mysql_async::Error) -> SourceError {
    match e {
        mysql_async::Error::Server(ref server) => match server.code {
            ER_ACCESS_DENIED | ER_DBACCESS_DENIED => SourceError::Auth {
                details: server.message.clone().into(),
            },
            ER_BAD_DB | ER_NO_SUCH_TABLE => SourceError::NotFound {
                details: server.message.clone().into(),
            },
            ER_BAD_FIELD => SourceError::Schema {
                details: server.message.clone().into(),
            },
            _ => SourceError::Query {
                details: format!("mysql query: {e}").into(),
            },
        },
        mysql_async::Error::Io(_) => SourceError::Connect {
            details: format!("mysql connection: {e}").into(),
        },
        mysql_async::Error::Url(_) => SourceError::Connect {
            details: format!("invalid MySQL DSN: {e}").into(),
        },
        other => SourceError::Other(other.into()),
    }
}

/// Whether a failed connect/query is worth another attempt.
pub(crate) fn is_retryable_source_error(e: &SourceError) -> bool {
    match e {
        SourceError::Timeout { .. }
        | SourceError::Connect { .. }
        | SourceError::Io(_) => {
            !is_permanent_failure(&e.to_string())
        }
        SourceError::Other(inner) => is_retryable_message(&inner.to_string()),
        _ => false,
    }
}
