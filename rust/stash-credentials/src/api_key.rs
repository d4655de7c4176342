use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Action, Caveat, CredentialError, Denial};

type HmacSha256 = Hmac<Sha256>;

/// Length of an API key head and of every tail in its chain.
pub const KEY_LENGTH: usize = 32;

/// The satellite-held root secret that API keys are minted from.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; KEY_LENGTH]);

impl Secret {
    /// A fresh random secret.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Wraps existing secret bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

fn sign(key: &[u8], message: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any size");
    mac.update(message);
    mac
}

fn caveat_bytes(caveat: &Caveat) -> Result<Vec<u8>, CredentialError> {
    serde_ipld_dagcbor::to_vec(caveat).map_err(|error| CredentialError::Encode(error.to_string()))
}

/// An API key: an identifying head, a chain of caveats and an HMAC tail.
///
/// Each caveat re-keys the chain with the previous tail, so appending a
/// caveat needs only the key itself while removing one requires the root
/// secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(rename = "h", with = "serde_bytes")]
    head: Vec<u8>,
    #[serde(rename = "c", default)]
    caveats: Vec<Caveat>,
    #[serde(rename = "t", with = "serde_bytes")]
    tail: Vec<u8>,
}

impl ApiKey {
    /// Mints an unrestricted key with a random head.
    pub fn generate(secret: &Secret) -> Self {
        let head: [u8; KEY_LENGTH] = rand::random();
        Self::issue(head.to_vec(), secret)
    }

    /// Mints an unrestricted key for a known head.
    pub fn issue(head: Vec<u8>, secret: &Secret) -> Self {
        let tail = sign(secret.as_bytes(), &head).finalize().into_bytes().to_vec();
        Self {
            head,
            caveats: Vec::new(),
            tail,
        }
    }

    /// Identifies the key to the satellite.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Caveats in the order they were added.
    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    /// Returns a key that additionally carries `caveat`.
    pub fn restrict(&self, caveat: Caveat) -> Result<Self, CredentialError> {
        let tail = sign(&self.tail, &caveat_bytes(&caveat)?)
            .finalize()
            .into_bytes()
            .to_vec();
        let mut caveats = self.caveats.clone();
        caveats.push(caveat);
        Ok(Self {
            head: self.head.clone(),
            caveats,
            tail,
        })
    }

    /// True when the chain was derived from `secret` without tampering.
    pub fn verify(&self, secret: &Secret) -> bool {
        let Some((last, earlier)) = self.caveats.split_last() else {
            return sign(secret.as_bytes(), &self.head)
                .verify_slice(&self.tail)
                .is_ok();
        };

        let mut tail = sign(secret.as_bytes(), &self.head).finalize().into_bytes();
        for caveat in earlier {
            let Ok(bytes) = caveat_bytes(caveat) else {
                return false;
            };
            tail = sign(&tail, &bytes).finalize().into_bytes();
        }

        match caveat_bytes(last) {
            Ok(bytes) => sign(&tail, &bytes).verify_slice(&self.tail).is_ok(),
            Err(_) => false,
        }
    }

    /// Checks `action` against every caveat in the chain.
    ///
    /// This does not verify the chain; see [`ApiKey::verify`].
    pub fn check(&self, action: &Action<'_>) -> Result<(), Denial> {
        self.caveats
            .iter()
            .try_for_each(|caveat| caveat.check(action))
    }

    /// The earliest expiry imposed by any caveat.
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.caveats.iter().filter_map(|caveat| caveat.not_after).min()
    }

    pub(crate) fn validate(&self) -> Result<(), CredentialError> {
        if self.head.is_empty() {
            return Err(CredentialError::Malformed("API key head is empty".into()));
        }
        if self.tail.len() != KEY_LENGTH {
            return Err(CredentialError::Malformed(format!(
                "API key tail is {} bytes, expected {KEY_LENGTH}",
                self.tail.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("caveats", &self.caveats)
            .finish_non_exhaustive()
    }
}
