use std::fmt;
use std::io;

use stash_credentials::CredentialError;
use stash_network::NetworkError;
use thiserror::Error;

use crate::DerivationError;

/// Problems with the initialization map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Keys other than the recognized ones were supplied.
    #[error("config has invalid keys {keys:?}; valid keys are {valid:?}")]
    UnknownKeys {
        /// The offending keys, sorted.
        keys: Vec<String>,
        /// The keys that are accepted.
        valid: Vec<String>,
    },

    /// A required key is absent or empty.
    #[error("config key {0} is required")]
    MissingKey(String),

    /// A key holds an unusable value.
    #[error("config key {key} is invalid: {reason}")]
    InvalidValue {
        /// The key.
        key: String,
        /// What is wrong with its value.
        reason: String,
    },

    /// The access grant could not be parsed.
    #[error("access grant is invalid")]
    InvalidGrant(#[source] CredentialError),
}

/// The facade operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `init`
    Initialize,
    /// `put`
    Put,
    /// `exists`
    Stat,
    /// `get`
    Get,
    /// `list`
    List,
    /// `list_common_prefixes`
    ListCommonPrefixes,
    /// `delete`
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "initialize",
            Operation::Put => "put",
            Operation::Stat => "stat",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::ListCommonPrefixes => "list common prefixes",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Broad classes of failure, for callers that need to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The configuration is unusable. Retrying will not help.
    Config,
    /// The store is not initialized, or was closed.
    NotInitialized,
    /// The bucket or object does not exist.
    NotFound,
    /// The grant does not allow the request.
    PermissionDenied,
    /// The request failed along the way and may succeed later.
    Transient,
    /// The caller cancelled the request, or its deadline passed.
    Cancelled,
    /// A restricted grant could not be derived.
    CapabilityDerivation,
    /// The request was rejected as malformed.
    InvalidRequest,
}

impl ErrorKind {
    /// True when the same request may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl From<&NetworkError> for ErrorKind {
    fn from(error: &NetworkError) -> Self {
        match error {
            NetworkError::BucketNotFound(_) | NetworkError::ObjectNotFound { .. } => {
                ErrorKind::NotFound
            }
            NetworkError::PermissionDenied(_) | NetworkError::InvalidAccess(_) => {
                ErrorKind::PermissionDenied
            }
            NetworkError::InvalidArgument(_) | NetworkError::BucketExists(_) => {
                ErrorKind::InvalidRequest
            }
            NetworkError::Transport(_) | NetworkError::SessionClosed => ErrorKind::Transient,
            NetworkError::Cancelled | NetworkError::DeadlineExceeded => ErrorKind::Cancelled,
        }
    }
}

/// Errors returned by [`crate::ObjectStore`].
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// The initialization map was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation was attempted before a successful `init`.
    #[error("object store is not initialized")]
    NotInitialized,

    /// An operation was attempted after `close`.
    #[error("object store is closed")]
    Closed,

    /// No session could be opened with the root grant.
    #[error("failed to open a session")]
    Connect {
        /// What the network said.
        #[source]
        source: NetworkError,
    },

    /// The storage network failed a request.
    #[error("{operation} {bucket}/{key} failed")]
    Network {
        /// The failing operation.
        operation: Operation,
        /// The bucket.
        bucket: String,
        /// The key or prefix.
        key: String,
        /// What the network said.
        #[source]
        source: NetworkError,
    },

    /// The data handed to `put` could not be read.
    #[error("failed to read the body for {bucket}/{key}")]
    Body {
        /// The bucket.
        bucket: String,
        /// The key.
        key: String,
        /// The read failure.
        #[source]
        source: io::Error,
    },

    /// A signed URL could not be produced.
    #[error("failed to sign a URL for {bucket}/{key}")]
    Derivation {
        /// The bucket.
        bucket: String,
        /// The key.
        key: String,
        /// Why derivation failed.
        #[source]
        source: DerivationError,
    },
}

impl ObjectStoreError {
    pub(crate) fn network(
        operation: Operation,
        bucket: &str,
        key: &str,
        source: NetworkError,
    ) -> Self {
        ObjectStoreError::Network {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }

    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ObjectStoreError::Config(_) => ErrorKind::Config,
            ObjectStoreError::NotInitialized | ObjectStoreError::Closed => {
                ErrorKind::NotInitialized
            }
            ObjectStoreError::Connect { source } | ObjectStoreError::Network { source, .. } => {
                ErrorKind::from(source)
            }
            ObjectStoreError::Body { .. } => ErrorKind::Transient,
            ObjectStoreError::Derivation { .. } => ErrorKind::CapabilityDerivation,
        }
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_classifies_network_errors() {
        let cases = [
            (NetworkError::BucketNotFound("b".into()), ErrorKind::NotFound),
            (
                NetworkError::ObjectNotFound {
                    bucket: "b".into(),
                    key: "k".into(),
                },
                ErrorKind::NotFound,
            ),
            (
                NetworkError::PermissionDenied("no".into()),
                ErrorKind::PermissionDenied,
            ),
            (
                NetworkError::InvalidAccess("no".into()),
                ErrorKind::PermissionDenied,
            ),
            (NetworkError::Transport("reset".into()), ErrorKind::Transient),
            (NetworkError::Cancelled, ErrorKind::Cancelled),
            (NetworkError::DeadlineExceeded, ErrorKind::Cancelled),
        ];

        for (source, expected) in cases {
            let error = ObjectStoreError::network(Operation::Get, "b", "k", source);
            assert_eq!(error.kind(), expected, "{error}");
        }
    }

    #[test]
    fn it_only_retries_transient_failures() {
        assert!(ErrorKind::Transient.is_retryable());
        for kind in [
            ErrorKind::Config,
            ErrorKind::NotInitialized,
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::Cancelled,
            ErrorKind::CapabilityDerivation,
            ErrorKind::InvalidRequest,
        ] {
            assert!(!kind.is_retryable(), "{kind:?}");
        }
    }

    #[test]
    fn it_keeps_the_cause() {
        use std::error::Error;

        let error = ObjectStoreError::network(
            Operation::Delete,
            "velero",
            "backups/a",
            NetworkError::Transport("connection reset".into()),
        );

        assert_eq!(error.to_string(), "delete velero/backups/a failed");
        let source = error.source().and_then(|source| source.downcast_ref::<NetworkError>());
        assert_eq!(
            source,
            Some(&NetworkError::Transport("connection reset".into()))
        );

        // Chain reporters print the cause exactly once.
        assert_eq!(
            format!("{:#}", anyhow::Error::from(error)),
            "delete velero/backups/a failed: transport error: connection reset"
        );
    }

    #[test]
    fn it_reports_each_cause_once() {
        let connect = ObjectStoreError::Connect {
            source: NetworkError::InvalidAccess("API key rejected".into()),
        };
        assert_eq!(
            format!("{:#}", anyhow::Error::from(connect)),
            "failed to open a session: invalid access grant: API key rejected"
        );

        let config = ObjectStoreError::from(ConfigError::InvalidGrant(CredentialError::Truncated));
        assert_eq!(
            format!("{:#}", anyhow::Error::from(config)),
            "access grant is invalid: access grant is truncated"
        );
    }
}
