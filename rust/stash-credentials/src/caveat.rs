use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Permission, SharePrefix};

/// A class of operation against the storage network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Download or stat an object.
    Read,
    /// Upload an object.
    Write,
    /// List objects.
    List,
    /// Delete an object.
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Read => "read",
            Op::Write => "write",
            Op::List => "list",
            Op::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A request to be checked against an API key.
///
/// For [`Op::List`] the `key` is the listing prefix.
#[derive(Debug, Clone, Copy)]
pub struct Action<'a> {
    /// What is being done.
    pub op: Op,
    /// Bucket being acted on.
    pub bucket: &'a str,
    /// Object key, or listing prefix.
    pub key: &'a str,
    /// When the request is made.
    pub time: DateTime<Utc>,
}

/// Why a caveat rejected an [`Action`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The operation is disallowed.
    #[error("{0} is not permitted")]
    Operation(Op),

    /// The key expired.
    #[error("access has expired")]
    Expired,

    /// The key is not valid yet.
    #[error("access is not valid yet")]
    NotYetValid,

    /// The target lies outside every allowed path.
    #[error("{bucket}/{key} is outside the allowed paths")]
    Path {
        /// Requested bucket.
        bucket: String,
        /// Requested key or prefix.
        key: String,
    },
}

/// One restriction in an API key's caveat chain.
///
/// Caveats only ever take rights away; a key is allowed to do something when
/// every caveat in its chain allows it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Caveat {
    /// Downloads are disallowed.
    #[serde(rename = "dr", default, skip_serializing_if = "std::ops::Not::not")]
    pub disallow_reads: bool,
    /// Uploads are disallowed.
    #[serde(rename = "dw", default, skip_serializing_if = "std::ops::Not::not")]
    pub disallow_writes: bool,
    /// Listing is disallowed.
    #[serde(rename = "dl", default, skip_serializing_if = "std::ops::Not::not")]
    pub disallow_lists: bool,
    /// Deletes are disallowed.
    #[serde(rename = "dd", default, skip_serializing_if = "std::ops::Not::not")]
    pub disallow_deletes: bool,
    /// When non-empty, only targets covered by one of these are allowed.
    #[serde(rename = "ap", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<SharePrefix>,
    /// Not valid before this instant.
    #[serde(
        rename = "nbf",
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before: Option<DateTime<Utc>>,
    /// Not valid after this instant.
    #[serde(
        rename = "exp",
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_after: Option<DateTime<Utc>>,
}

impl Caveat {
    /// The caveat that narrows a key down to `permission` within `prefixes`.
    ///
    /// Time bounds are kept at whole-second precision, which is what survives
    /// serialization.
    pub fn new(permission: &Permission, prefixes: Vec<SharePrefix>) -> Self {
        Self {
            disallow_reads: !permission.allow_download,
            disallow_writes: !permission.allow_upload,
            disallow_lists: !permission.allow_list,
            disallow_deletes: !permission.allow_delete,
            allowed_paths: prefixes,
            not_before: permission.not_before.map(|at| at.trunc_subsecs(0)),
            not_after: permission.not_after.map(|at| at.trunc_subsecs(0)),
        }
    }

    /// Checks `action` against this caveat.
    pub fn check(&self, action: &Action<'_>) -> Result<(), Denial> {
        let disallowed = match action.op {
            Op::Read => self.disallow_reads,
            Op::Write => self.disallow_writes,
            Op::List => self.disallow_lists,
            Op::Delete => self.disallow_deletes,
        };
        if disallowed {
            return Err(Denial::Operation(action.op));
        }

        if self.not_after.is_some_and(|exp| action.time > exp) {
            return Err(Denial::Expired);
        }
        if self.not_before.is_some_and(|nbf| action.time < nbf) {
            return Err(Denial::NotYetValid);
        }

        if !self.allowed_paths.is_empty()
            && !self
                .allowed_paths
                .iter()
                .any(|path| path.covers(action.bucket, action.key))
        {
            return Err(Denial::Path {
                bucket: action.bucket.to_string(),
                key: action.key.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn action<'a>(op: Op, bucket: &'a str, key: &'a str, time: DateTime<Utc>) -> Action<'a> {
        Action {
            op,
            bucket,
            key,
            time,
        }
    }

    #[test]
    fn it_disallows_operations_missing_from_the_permission() {
        let caveat = Caveat::new(&Permission::download_only(), vec![]);
        let now = at(1_700_000_000);

        assert_eq!(caveat.check(&action(Op::Read, "b", "k", now)), Ok(()));
        assert_eq!(
            caveat.check(&action(Op::Write, "b", "k", now)),
            Err(Denial::Operation(Op::Write))
        );
        assert_eq!(
            caveat.check(&action(Op::List, "b", "", now)),
            Err(Denial::Operation(Op::List))
        );
        assert_eq!(
            caveat.check(&action(Op::Delete, "b", "k", now)),
            Err(Denial::Operation(Op::Delete))
        );
    }

    #[test]
    fn it_enforces_the_validity_window() {
        let permission = Permission::full()
            .with_not_before(at(100))
            .with_not_after(at(200));
        let caveat = Caveat::new(&permission, vec![]);

        assert_eq!(
            caveat.check(&action(Op::Read, "b", "k", at(99))),
            Err(Denial::NotYetValid)
        );
        assert_eq!(caveat.check(&action(Op::Read, "b", "k", at(100))), Ok(()));
        assert_eq!(caveat.check(&action(Op::Read, "b", "k", at(200))), Ok(()));
        assert_eq!(
            caveat.check(&action(Op::Read, "b", "k", at(201))),
            Err(Denial::Expired)
        );
    }

    #[test]
    fn it_confines_actions_to_allowed_paths() {
        let caveat = Caveat::new(
            &Permission::full(),
            vec![SharePrefix::new("velero", "backups/a").unwrap()],
        );
        let now = at(1_700_000_000);

        assert_eq!(
            caveat.check(&action(Op::Read, "velero", "backups/a/x", now)),
            Ok(())
        );
        assert!(matches!(
            caveat.check(&action(Op::Read, "velero", "backups/b/x", now)),
            Err(Denial::Path { .. })
        ));
        assert!(matches!(
            caveat.check(&action(Op::Read, "restic", "backups/a/x", now)),
            Err(Denial::Path { .. })
        ));
    }

    #[test]
    fn it_truncates_time_bounds_to_seconds() {
        let expiry = at(500) + TimeDelta::milliseconds(750);
        let caveat = Caveat::new(&Permission::full().with_not_after(expiry), vec![]);
        assert_eq!(caveat.not_after, Some(at(500)));
    }

    #[test]
    fn it_survives_encoding() {
        let caveat = Caveat::new(
            &Permission::read_only().with_not_after(at(1_800_000_000)),
            vec![SharePrefix::new("velero", "backups/").unwrap()],
        );
        let bytes = serde_ipld_dagcbor::to_vec(&caveat).unwrap();
        let decoded: Caveat = serde_ipld_dagcbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, caveat);
    }
}
