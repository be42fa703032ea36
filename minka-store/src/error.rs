//! Typed errors for the storage engine.
use minka_core::ErrorResponse;
use thiserror::Error;

/// Possible failures when operating the revision store
#[derive(Error, Debug)]
pub enum Error {
    /// Requested key absent, or the resource version refers to no object
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Plural name of the kind
        kind: String,
        /// The requested object name
        name: String,
    },

    /// Create collided with a live object
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Plural name of the kind
        kind: String,
        /// The conflicting object name
        name: String,
    },

    /// Optimistic update or delete lost a race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Validation failure
    #[error("invalid: {0}")]
    Invalid(String),

    /// The supplied resource version predates the compaction watermark
    #[error("resource version {0} is older than the compaction watermark")]
    Expired(i64),

    /// Deadline exceeded, or a requested revision has not been committed
    #[error("timeout: {0}")]
    Timeout(String),

    /// The database rejected or failed an operation
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Database unreachable or connection pool exhausted
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    /// A stored payload failed to encode or decode
    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenient alias for `Result` with the storage error
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Error::Unavailable(err),
            sqlx::Error::Io(_) => Error::Unavailable(err),
            other => Error::Database(other),
        }
    }
}

impl From<minka_core::Error> for Error {
    fn from(err: minka_core::Error) -> Self {
        match err {
            minka_core::Error::Validation(msg) => Error::Invalid(msg),
            minka_core::Error::Serde(e) => Error::Serde(e),
        }
    }
}

impl Error {
    /// Whether a database error is a unique constraint violation.
    ///
    /// Concurrent writers racing on the `previous_id` unique index surface
    /// this way; callers map it to [`Error::Conflict`].
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }

    /// Convert into the status-shaped response handed to REST consumers
    pub fn into_response(&self) -> ErrorResponse {
        match self {
            Error::NotFound { kind, name } => ErrorResponse::not_found(kind, name),
            Error::AlreadyExists { kind, name } => ErrorResponse::already_exists(kind, name),
            Error::Conflict(msg) => ErrorResponse::conflict(msg.clone()),
            Error::Invalid(msg) => ErrorResponse::invalid(msg.clone()),
            Error::Expired(rv) => ErrorResponse::expired(*rv),
            Error::Timeout(msg) => ErrorResponse::timeout(msg.clone()),
            Error::Unavailable(err) => ErrorResponse::service_unavailable(err.to_string()),
            Error::Database(err) => ErrorResponse::internal(err.to_string()),
            Error::Serde(err) => ErrorResponse::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn response_codes_follow_the_taxonomy() {
        let not_found = Error::NotFound {
            kind: "widgets".into(),
            name: "w1".into(),
        };
        assert_eq!(not_found.into_response().code, 404);
        assert_eq!(Error::Conflict("rv".into()).into_response().code, 409);
        assert_eq!(Error::Invalid("bad".into()).into_response().code, 422);
        assert_eq!(Error::Expired(3).into_response().code, 410);
        assert_eq!(Error::Timeout("rv 9 unseen".into()).into_response().code, 504);
    }

    #[test]
    fn pool_exhaustion_maps_to_unavailable() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.into_response().code, 503);
    }
}
