//! Error types for the data layer

use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;

/// Errors surfaced by [`Database`](super::Database) operations.
///
/// Each variant carries a status code (see [`DbError::status_code`]) so the
/// HTTP layer can map it without inspecting messages.
#[derive(Debug, Error)]
pub enum DbError {
    /// Missing row, bad credentials, or an unresolvable role target
    #[error("{0}")]
    NotFound(String),

    /// Duplicate registration
    #[error("{0}")]
    Conflict(String),

    /// Role or ownership check failed
    #[error("{0}")]
    Forbidden(String),

    /// Caller passed an argument the operation cannot use
    #[error("{0}")]
    InvalidInput(String),

    /// Operation failed; the message is safe to show to clients
    #[error("{0}")]
    Internal(String),

    /// Statement execution failed
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to open the connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// Password hashing or verification failed
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl DbError {
    pub fn not_found(message: impl Into<String>) -> Self {
        DbError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DbError::Conflict(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            DbError::NotFound(_) => 404,
            DbError::Conflict(_) => 409,
            DbError::Forbidden(_) => 403,
            DbError::InvalidInput(_) => 400,
            DbError::Internal(_)
            | DbError::Query(_)
            | DbError::Connection(_)
            | DbError::Hashing(_) => 500,
        }
    }
}

/// MySQL error numbers that mean the server dropped the session.
const CONNECTION_LOST_ERRORS: &[u16] = &[1053, 1927, 2006, 2013, 4031];

fn is_connection_lost(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|mysql| CONNECTION_LOST_ERRORS.contains(&mysql.number())),
        _ => false,
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        if is_connection_lost(&e) {
            return DbError::Connection(e.to_string());
        }
        match &e {
            sqlx::Error::Configuration(_) | sqlx::Error::PoolTimedOut => {
                DbError::Connection(e.to_string())
            }
            _ => DbError::Query(e),
        }
    }
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(DbError::not_found("unknown user").status_code(), 404);
        assert_eq!(DbError::conflict("user already exists").status_code(), 409);
        assert_eq!(DbError::Forbidden("nope".into()).status_code(), 403);
        assert_eq!(DbError::InvalidInput("page".into()).status_code(), 400);
        assert_eq!(
            DbError::Internal("unable to delete franchise".into()).status_code(),
            500
        );
        assert_eq!(DbError::from(sqlx::Error::RowNotFound).status_code(), 500);
    }

    #[test]
    fn driver_errors_are_wrapped() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Query(_)));

        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Connection(_)));

        let err = DbError::from(sqlx::Error::Protocol("unexpected packet".into()));
        assert!(matches!(err, DbError::Connection(_)));

        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(DbError::from(sqlx::Error::Io(eof)), DbError::Connection(_)));
    }
}
