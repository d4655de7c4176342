use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CredentialError;

/// The operations a grant may be restricted to, plus an optional validity
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permission {
    /// Objects may be downloaded and stat'ed.
    pub allow_download: bool,
    /// Objects may be uploaded.
    pub allow_upload: bool,
    /// Objects may be listed.
    pub allow_list: bool,
    /// Objects may be deleted.
    pub allow_delete: bool,
    /// The grant is not valid before this instant.
    pub not_before: Option<DateTime<Utc>>,
    /// The grant is not valid after this instant.
    pub not_after: Option<DateTime<Utc>>,
}

impl Permission {
    /// Every operation, no time bounds.
    pub fn full() -> Self {
        Self {
            allow_download: true,
            allow_upload: true,
            allow_list: true,
            allow_delete: true,
            ..Self::default()
        }
    }

    /// Download and list.
    pub fn read_only() -> Self {
        Self {
            allow_download: true,
            allow_list: true,
            ..Self::default()
        }
    }

    /// Download only.
    pub fn download_only() -> Self {
        Self {
            allow_download: true,
            ..Self::default()
        }
    }

    /// Upload, list and delete.
    pub fn write_only() -> Self {
        Self {
            allow_upload: true,
            allow_list: true,
            allow_delete: true,
            ..Self::default()
        }
    }

    /// Returns a copy that is not valid before `at`.
    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Returns a copy that is not valid after `at`.
    pub fn with_not_after(mut self, at: DateTime<Utc>) -> Self {
        self.not_after = Some(at);
        self
    }

    /// True when no operation is allowed.
    pub fn is_empty(&self) -> bool {
        !(self.allow_download || self.allow_upload || self.allow_list || self.allow_delete)
    }
}

/// A bucket and an optional key prefix that a grant is confined to.
///
/// Prefixes match on path components: `backups/a` covers `backups/a` and
/// `backups/a/x`, but not `backups/ab`. A prefix with a trailing `/` covers
/// every key that starts with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharePrefix {
    #[serde(rename = "b")]
    bucket: String,
    #[serde(rename = "p", default, skip_serializing_if = "String::is_empty")]
    prefix: String,
}

impl SharePrefix {
    /// Confines a grant to `prefix` inside `bucket`.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self, CredentialError> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(CredentialError::MissingBucket);
        }
        Ok(Self {
            bucket,
            prefix: prefix.into(),
        })
    }

    /// Confines a grant to a whole bucket.
    pub fn full_bucket(bucket: impl Into<String>) -> Result<Self, CredentialError> {
        Self::new(bucket, "")
    }

    /// The bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The key prefix; empty means the whole bucket.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True when `key` in `bucket` falls under this prefix.
    pub fn covers(&self, bucket: &str, key: &str) -> bool {
        if self.bucket != bucket {
            return false;
        }
        if self.prefix.is_empty() || key == self.prefix {
            return true;
        }
        if self.prefix.ends_with('/') {
            return key.starts_with(&self.prefix);
        }
        key.strip_prefix(&self.prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for SharePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reports_empty_permissions() {
        assert!(Permission::default().is_empty());
        assert!(!Permission::download_only().is_empty());
        assert!(!Permission::write_only().is_empty());
    }

    #[test]
    fn it_requires_a_bucket() {
        assert_eq!(
            SharePrefix::new("", "a/"),
            Err(CredentialError::MissingBucket)
        );
    }

    #[test]
    fn it_matches_on_path_components() {
        let prefix = SharePrefix::new("velero", "backups/a").unwrap();

        assert!(prefix.covers("velero", "backups/a"));
        assert!(prefix.covers("velero", "backups/a/velero-backup.json"));
        assert!(!prefix.covers("velero", "backups/ab"));
        assert!(!prefix.covers("velero", "backups"));
        assert!(!prefix.covers("other", "backups/a"));
    }

    #[test]
    fn it_treats_a_trailing_slash_as_a_directory() {
        let prefix = SharePrefix::new("velero", "backups/").unwrap();

        assert!(prefix.covers("velero", "backups/"));
        assert!(prefix.covers("velero", "backups/a/b"));
        assert!(!prefix.covers("velero", "backups"));
        assert!(!prefix.covers("velero", "restores/a"));
    }

    #[test]
    fn it_covers_a_whole_bucket_with_an_empty_prefix() {
        let prefix = SharePrefix::full_bucket("velero").unwrap();

        assert!(prefix.covers("velero", ""));
        assert!(prefix.covers("velero", "anything/at/all"));
        assert!(!prefix.covers("restic", "anything"));
    }
}
