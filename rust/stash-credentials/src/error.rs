use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while parsing, restricting or serializing access grants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The serialized grant was empty.
    #[error("access grant is empty")]
    Empty,

    /// The serialized grant is not valid base58.
    #[error("access grant is not valid base58: {0}")]
    InvalidEncoding(String),

    /// The decoded grant is too short to carry a version and checksum.
    #[error("access grant is truncated")]
    Truncated,

    /// The checksum embedded in the grant does not match its payload.
    #[error("access grant checksum mismatch")]
    ChecksumMismatch,

    /// The grant was produced by an unknown format version.
    #[error("unsupported access grant version {0}")]
    UnsupportedVersion(u8),

    /// The grant payload could not be decoded or is structurally invalid.
    #[error("malformed access grant: {0}")]
    Malformed(String),

    /// A grant or caveat could not be encoded.
    #[error("failed to encode access grant: {0}")]
    Encode(String),

    /// A restriction was requested that allows no operation at all.
    #[error("permission allows no operation")]
    EmptyPermission,

    /// A restriction was requested whose validity window is empty.
    #[error("not_before {not_before} is after not_after {not_after}")]
    InvalidTimeBounds {
        /// Start of the requested window.
        not_before: DateTime<Utc>,
        /// End of the requested window.
        not_after: DateTime<Utc>,
    },

    /// A share prefix was requested without a bucket.
    #[error("share prefix requires a bucket")]
    MissingBucket,
}
