use serde::{Deserialize, Serialize};

use crate::encoding::{decode, encode};
use crate::{Action, ApiKey, Caveat, CredentialError, Denial, Permission, SharePrefix};

/// A serializable credential: where the project lives and the key that opens
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(rename = "sat")]
    satellite: String,
    #[serde(rename = "key")]
    api_key: ApiKey,
}

impl Grant {
    /// Pairs a satellite address with an API key.
    pub fn new(satellite: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            satellite: satellite.into(),
            api_key,
        }
    }

    /// Parses a serialized grant.
    ///
    /// Only the structure is checked; whether the key is genuine is for the
    /// satellite to decide.
    pub fn parse(serialized: &str) -> Result<Self, CredentialError> {
        let payload = decode(serialized)?;
        let grant: Grant = serde_ipld_dagcbor::from_slice(&payload)
            .map_err(|error| CredentialError::Malformed(error.to_string()))?;

        if grant.satellite.is_empty() {
            return Err(CredentialError::Malformed(
                "satellite address is empty".into(),
            ));
        }
        grant.api_key.validate()?;

        Ok(grant)
    }

    /// The URL-safe serialized form.
    pub fn serialize(&self) -> Result<String, CredentialError> {
        let payload = serde_ipld_dagcbor::to_vec(self)
            .map_err(|error| CredentialError::Encode(error.to_string()))?;
        Ok(encode(&payload))
    }

    /// Satellite address.
    pub fn satellite(&self) -> &str {
        &self.satellite
    }

    /// The API key.
    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    /// Derives a grant restricted to `permission` within `prefixes`.
    ///
    /// The derived grant can never do more than this one: its key carries
    /// every caveat of this key plus the new one. An expiry in the past is
    /// accepted; such a grant is simply refused when used.
    pub fn share(
        &self,
        permission: &Permission,
        prefixes: &[SharePrefix],
    ) -> Result<Self, CredentialError> {
        if permission.is_empty() {
            return Err(CredentialError::EmptyPermission);
        }
        if let (Some(not_before), Some(not_after)) = (permission.not_before, permission.not_after) {
            if not_before > not_after {
                return Err(CredentialError::InvalidTimeBounds {
                    not_before,
                    not_after,
                });
            }
        }

        let caveat = Caveat::new(permission, prefixes.to_vec());
        Ok(Self {
            satellite: self.satellite.clone(),
            api_key: self.api_key.restrict(caveat)?,
        })
    }

    /// Checks `action` against every restriction carried by this grant.
    pub fn authorize(&self, action: &Action<'_>) -> Result<(), Denial> {
        self.api_key.check(action)
    }
}
