//! An in-memory storage network for tests.
//!
//! [`Satellite`] keeps buckets and objects in memory and enforces access
//! grants exactly as the network would: API keys must verify against the
//! satellite's secret, and every request is checked against the key's
//! caveats. [`Linksharing`] resolves shared URLs against a satellite, and
//! [`LinksharingServer`] serves those URLs over HTTP.

mod linksharing;
pub use linksharing::*;

mod satellite;
pub use satellite::*;

#[cfg(feature = "helpers")]
mod server;
#[cfg(feature = "helpers")]
pub use server::*;
