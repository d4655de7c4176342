use thiserror::Error;

/// Errors returned by the storage network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The bucket does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// The object does not exist.
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Key that was not found.
        key: String,
    },

    /// The bucket already exists.
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    /// The grant does not allow the request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The grant was rejected outright.
    #[error("invalid access grant: {0}")]
    InvalidAccess(String),

    /// The request itself is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request failed in transit; it may succeed if retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The request ran past its deadline.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The session was already closed.
    #[error("session is closed")]
    SessionClosed,
}

impl NetworkError {
    /// True for "bucket not found" and "object not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NetworkError::BucketNotFound(_) | NetworkError::ObjectNotFound { .. }
        )
    }
}
