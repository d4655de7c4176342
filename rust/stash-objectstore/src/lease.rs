use std::ops::Deref;

use stash_network::Session;
use tracing::warn;

/// A session that is closed when the lease is dropped.
pub(crate) struct Lease {
    session: Box<dyn Session>,
}

impl Lease {
    pub(crate) fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }
}

impl Deref for Lease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Err(error) = self.session.close() {
            warn!(%error, "Failed to release session");
        }
    }
}
