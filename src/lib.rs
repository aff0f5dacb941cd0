//! Expiry Cache - an embeddable in-memory key-value cache
//!
//! Every entry carries its own life span. Two expiration policies are
//! available: default-sweep stores with absolute deadlines and a periodic
//! janitor, and named sliding tables whose deadlines move with each access.
//! Stores fire add/evict callbacks, can materialize misses through a loader,
//! and save or load snapshots of their live entries.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{Entry, ExpirationPolicy, LifeSpan, Loaded, Registry, Store};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
