//! Upstream (source, group) state storage
//!
//! The registry owns one [`UpstreamEntry`] per [`UpstreamKey`] and keeps
//! the implicit tree between (S,G), (*,G) and (*,*) entries. Parent and
//! child links are plain keys resolved back through the registry, so the
//! registry stays the sole owner and teardown can never leave a dangling
//! reference.
//!
//! # Tree shape
//!
//! ```text
//!                 (*,*)
//!                   │
//!            ┌──────┴──────┐
//!        (*,224.1.1.1) (*,224.1.1.2)
//!            │
//!      ┌─────┴─────┐
//! (10.0.0.1,G) (10.0.0.2,G)
//! ```
//!
//! All state-machine behavior lives in [`crate::engine`]; this module is
//! only storage, identity, and tree maintenance.

pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use entry::{JoinState, RegisterState, UpstreamEntry, UpstreamFlags};
pub use error::UpstreamError;
pub use key::UpstreamKey;
pub use store::UpstreamRegistry;
