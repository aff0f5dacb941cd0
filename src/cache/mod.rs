//! Cache Module
//!
//! Provides an in-memory key-value cache with per-entry expiration,
//! lifecycle callbacks, a miss-loader and snapshot persistence.

mod access;
mod callbacks;
mod entry;
mod persistence;
mod policy;
mod registry;
mod store;


// Re-export public types
pub use access::{rank_most_accessed, AccessTracker};
pub use callbacks::{EntryCallback, Loaded, MissLoader};
pub use entry::{Entry, ExpireCallback, LifeSpan};
pub use policy::ExpirationPolicy;
pub use registry::Registry;
pub use store::Store;

pub(crate) use store::WeakStore;
