#![warn(missing_docs)]

//! An object store for backup tools, backed by the storage network.
//!
//! Backup tools think in buckets, keys and delimiters, and hand out
//! pre-signed URLs for downloads. The storage network thinks in access
//! grants, sessions and hierarchical listings. [`ObjectStore`] translates
//! between the two:
//!
//! - it is initialized with a configuration map holding a serialized root
//!   access grant,
//! - every operation opens its own session from that grant and releases it
//!   on every exit path,
//! - signed URLs embed a freshly derived grant that can only download the
//!   one object, and only until the URL expires.
//!
//! ```no_run
//! # use std::collections::HashMap;
//! # use std::sync::Arc;
//! # use stash_network::{Context, Network};
//! # use stash_objectstore::ObjectStore;
//! # async fn example(network: Arc<dyn Network>, grant: String) -> Result<(), stash_objectstore::ObjectStoreError> {
//! let cx = Context::background();
//! let mut store = ObjectStore::new(network);
//! store
//!     .init(&cx, &HashMap::from([("accessGrant".to_string(), grant)]))
//!     .await?;
//!
//! store.put(&cx, "velero", "backups/a/data.tar.gz", &b"..."[..]).await?;
//! let url = store.create_signed_url("velero", "backups/a/data.tar.gz", chrono::TimeDelta::minutes(10))?;
//! # Ok(())
//! # }
//! ```

mod access;
pub use access::*;

mod error;
pub use error::*;

mod lease;

mod prefix;

mod reader;
pub use reader::*;

mod settings;
pub use settings::*;

mod store;
pub use store::*;
