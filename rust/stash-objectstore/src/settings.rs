use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stash_credentials::Permission;
use url::Url;

use crate::ConfigError;

/// Link-sharing origin used when the configuration does not name one.
pub const DEFAULT_LINKSHARING_BASE_URL: &str = "https://link.tardigradeshare.io";

/// What a signed URL's embedded grant is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharePolicy {
    /// Download only.
    #[default]
    Download,
    /// Download and list.
    DownloadAndList,
}

impl SharePolicy {
    /// The permission derived grants are restricted to.
    pub fn permission(&self) -> Permission {
        match self {
            SharePolicy::Download => Permission::download_only(),
            SharePolicy::DownloadAndList => Permission::read_only(),
        }
    }
}

/// Tunables of an [`crate::ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Configuration key holding the serialized root grant.
    pub access_grant_key: String,
    /// Configuration key holding an optional link-sharing origin.
    pub linksharing_base_url_key: String,
    /// Link-sharing origin used when none is configured.
    pub default_linksharing_base_url: String,
    /// What signed URLs may do.
    pub share_policy: SharePolicy,
    /// Bytes read from the source per upload write.
    pub copy_buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            access_grant_key: "accessGrant".into(),
            linksharing_base_url_key: "linksharingBaseURL".into(),
            default_linksharing_base_url: DEFAULT_LINKSHARING_BASE_URL.into(),
            share_policy: SharePolicy::default(),
            copy_buffer_size: 32 * 1024,
        }
    }
}

/// A validated initialization map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    /// The serialized root grant, not yet parsed.
    pub access_grant: String,
    /// Where signed URLs point.
    pub linksharing_base_url: Url,
}

impl Settings {
    /// Checks an initialization map: the access grant key is required, the
    /// link-sharing key is optional and nothing else is allowed.
    pub fn validate(&self, config: &HashMap<String, String>) -> Result<InitConfig, ConfigError> {
        let valid = [
            self.access_grant_key.as_str(),
            self.linksharing_base_url_key.as_str(),
        ];

        let mut unknown: Vec<String> = config
            .keys()
            .filter(|key| !valid.contains(&key.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(ConfigError::UnknownKeys {
                keys: unknown,
                valid: valid.iter().map(|key| key.to_string()).collect(),
            });
        }

        let access_grant = config
            .get(&self.access_grant_key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey(self.access_grant_key.clone()))?
            .clone();

        let (key, raw) = match config.get(&self.linksharing_base_url_key) {
            Some(value) => (self.linksharing_base_url_key.as_str(), value.as_str()),
            None => (
                "defaultLinksharingBaseUrl",
                self.default_linksharing_base_url.as_str(),
            ),
        };

        Ok(InitConfig {
            access_grant,
            linksharing_base_url: parse_base_url(key, raw)?,
        })
    }
}

fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|error| invalid(error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment".into()));
    }
    Ok(url)
}
