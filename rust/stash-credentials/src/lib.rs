#![warn(missing_docs)]

//! Access grants for the storage network.
//!
//! An access grant bundles the address of the satellite that owns a project
//! with an API key. The API key is a caveat chain: every caveat narrows what
//! the key may do, and anyone holding a grant can append caveats without
//! knowing the satellite's secret. Only the satellite can verify the chain.
//!
//! # Example
//!
//! ```
//! use stash_credentials::{ApiKey, Grant, Permission, Secret, SharePrefix};
//!
//! # fn example() -> Result<(), stash_credentials::CredentialError> {
//! let secret = Secret::generate();
//! let root = Grant::new("satellite.example:7777", ApiKey::generate(&secret));
//!
//! // Read-only access to `backups/daily/` in bucket `velero`.
//! let shared = root.share(
//!     &Permission::download_only(),
//!     &[SharePrefix::new("velero", "backups/daily/")?],
//! )?;
//!
//! let token = shared.serialize()?;
//! let parsed = Grant::parse(&token)?;
//! assert!(parsed.api_key().verify(&secret));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod api_key;
pub use api_key::*;

mod caveat;
pub use caveat::*;

mod encoding;

mod error;
pub use error::*;

mod grant;
pub use grant::*;

mod permission;
pub use permission::*;
