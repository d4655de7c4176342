#![warn(missing_docs)]

//! The storage network as seen by a client.
//!
//! A [`Network`] opens [`Session`]s from an access grant; a session carries
//! out object requests on behalf of that grant. Every request takes a
//! [`Context`] so callers can cancel it or bound it with a deadline.
//!
//! With the `helpers` feature, [`emulator`] provides an in-memory satellite
//! that enforces grants the way the real network does, along with a
//! link-sharing front-end.

mod context;
pub use context::*;

mod error;
pub use error::*;

mod session;
pub use session::*;

#[cfg(any(test, feature = "helpers"))]
pub mod emulator;
