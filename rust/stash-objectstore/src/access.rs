use chrono::{DateTime, TimeDelta, Utc};
use stash_credentials::{CredentialError, Grant, SharePrefix};
use thiserror::Error;
use url::Url;

use crate::SharePolicy;

/// Why a shareable grant could not be derived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    /// `now + ttl` does not fit in a timestamp.
    #[error("ttl {0} is out of range")]
    TtlOutOfRange(TimeDelta),

    /// The grant library refused the restriction.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// The long-lived grant the store was initialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootAccess(Grant);

impl RootAccess {
    /// The underlying grant.
    pub fn grant(&self) -> &Grant {
        &self.0
    }
}

/// Parses a serialized root grant. Nothing is sent over the network.
pub fn parse_root_access(serialized: &str) -> Result<RootAccess, CredentialError> {
    Grant::parse(serialized).map(RootAccess)
}

/// A grant narrowed to one bucket and key prefix until `not_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAccess {
    grant: Grant,
    bucket: String,
    prefix: String,
    not_after: DateTime<Utc>,
}

impl DerivedAccess {
    /// The underlying grant.
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// The only bucket this grant reaches.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The only key prefix this grant reaches.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// When this grant stops working.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// The URL-safe token form.
    pub fn serialize(&self) -> Result<String, CredentialError> {
        self.grant.serialize()
    }
}

/// Derives a grant that may only do what `policy` allows, only within
/// `key_prefix` of `bucket`, and only until `ttl` from now.
///
/// A zero or negative `ttl` yields a grant that is already expired; it is the
/// network that refuses it.
pub fn derive_shareable_access(
    root: &RootAccess,
    bucket: &str,
    key_prefix: &str,
    ttl: TimeDelta,
    policy: SharePolicy,
) -> Result<DerivedAccess, DerivationError> {
    derive_shareable_access_at(root, bucket, key_prefix, ttl, policy, Utc::now())
}

/// [`derive_shareable_access`] with an explicit clock.
pub fn derive_shareable_access_at(
    root: &RootAccess,
    bucket: &str,
    key_prefix: &str,
    ttl: TimeDelta,
    policy: SharePolicy,
    now: DateTime<Utc>,
) -> Result<DerivedAccess, DerivationError> {
    let not_after = now
        .checked_add_signed(ttl)
        .ok_or(DerivationError::TtlOutOfRange(ttl))?;

    let permission = policy.permission().with_not_after(not_after);
    let prefix = SharePrefix::new(bucket, key_prefix)?;
    let grant = root.grant().share(&permission, &[prefix])?;

    Ok(DerivedAccess {
        grant,
        bucket: bucket.to_string(),
        prefix: key_prefix.to_string(),
        not_after,
    })
}

/// `{base}/{token}/{bucket}/{key}`, with each of the last three escaped as a
/// single path segment.
pub fn build_share_url(base: &Url, token: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        base.as_str().trim_end_matches('/'),
        urlencoding::encode(token),
        urlencoding::encode(bucket),
        urlencoding::encode(key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use stash_credentials::{Action, ApiKey, Denial, Op, Secret};
    use testresult::TestResult;

    fn root() -> RootAccess {
        RootAccess(Grant::new(
            "satellite.local:7777",
            ApiKey::generate(&Secret::generate()),
        ))
    }

    fn read<'a>(bucket: &'a str, key: &'a str, time: DateTime<Utc>) -> Action<'a> {
        Action {
            op: Op::Read,
            bucket,
            key,
            time,
        }
    }

    #[test]
    fn it_parses_a_serialized_root() -> TestResult {
        let root = root();
        let parsed = parse_root_access(&root.grant().serialize()?)?;
        assert_eq!(parsed, root);
        assert!(parse_root_access("definitely not a grant").is_err());
        Ok(())
    }

    #[test]
    fn it_scopes_derived_access_to_one_prefix() -> TestResult {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let derived = derive_shareable_access_at(
            &root(),
            "velero",
            "x/",
            TimeDelta::minutes(1),
            SharePolicy::Download,
            now,
        )?;
        let grant = derived.grant();

        assert_eq!(derived.not_after(), now + TimeDelta::minutes(1));
        assert_eq!(grant.authorize(&read("velero", "x/backup", now)), Ok(()));
        assert!(matches!(
            grant.authorize(&read("other", "x/backup", now)),
            Err(Denial::Path { .. })
        ));
        assert!(matches!(
            grant.authorize(&read("velero", "y/backup", now)),
            Err(Denial::Path { .. })
        ));
        for op in [Op::Write, Op::List, Op::Delete] {
            let action = Action {
                op,
                bucket: "velero",
                key: "x/backup",
                time: now,
            };
            assert_eq!(grant.authorize(&action), Err(Denial::Operation(op)));
        }
        assert_eq!(
            grant.authorize(&read("velero", "x/backup", now + TimeDelta::minutes(2))),
            Err(Denial::Expired)
        );
        Ok(())
    }

    #[test]
    fn it_allows_listing_when_opted_in() -> TestResult {
        let now = Utc::now();
        let derived = derive_shareable_access_at(
            &root(),
            "velero",
            "x/",
            TimeDelta::minutes(1),
            SharePolicy::DownloadAndList,
            now,
        )?;
        let list = Action {
            op: Op::List,
            bucket: "velero",
            key: "x/",
            time: now,
        };
        assert_eq!(derived.grant().authorize(&list), Ok(()));
        Ok(())
    }

    #[test]
    fn it_derives_already_expired_access() -> TestResult {
        let now = Utc::now();
        for ttl in [TimeDelta::zero(), TimeDelta::minutes(-1)] {
            let derived = derive_shareable_access_at(
                &root(),
                "velero",
                "k",
                ttl,
                SharePolicy::Download,
                now,
            )?;
            assert!(!derived.serialize()?.is_empty());
            assert_eq!(
                derived
                    .grant()
                    .authorize(&read("velero", "k", now + TimeDelta::seconds(1))),
                Err(Denial::Expired)
            );
        }
        Ok(())
    }

    #[test]
    fn it_reports_unrepresentable_ttls() {
        let result = derive_shareable_access(
            &root(),
            "velero",
            "k",
            TimeDelta::MAX,
            SharePolicy::Download,
        );
        assert_eq!(result, Err(DerivationError::TtlOutOfRange(TimeDelta::MAX)));
    }

    #[test]
    fn it_requires_a_bucket() {
        let result = derive_shareable_access(
            &root(),
            "",
            "k",
            TimeDelta::minutes(1),
            SharePolicy::Download,
        );
        assert_eq!(
            result,
            Err(DerivationError::Credential(CredentialError::MissingBucket))
        );
    }

    #[test]
    fn it_builds_four_segment_urls() -> TestResult {
        let base = Url::parse("https://link.tardigradeshare.io")?;
        let url = build_share_url(&base, "1Token", "my bucket", "backups/a b/data.tar.gz");

        assert_eq!(
            url,
            "https://link.tardigradeshare.io/1Token/my%20bucket/backups%2Fa%20b%2Fdata.tar.gz"
        );

        let parsed = Url::parse(&url)?;
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        assert_eq!(segments.len(), 3);
        Ok(())
    }

    #[test]
    fn it_keeps_a_base_path() -> TestResult {
        let base = Url::parse("http://127.0.0.1:9000/share/")?;
        assert_eq!(
            build_share_url(&base, "t", "b", "k"),
            "http://127.0.0.1:9000/share/t/b/k"
        );
        Ok(())
    }
}
