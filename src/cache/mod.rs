//! Cache Module
//!
//! Provides an in-memory map with per-key staleness-driven invalidation.

mod expiration;
mod stats;
mod store;
mod value;


// Re-export public types
pub use expiration::{Expiration, Staleness, StalenessFn};
pub use stats::CacheStats;
pub use store::CacheMap;
pub use value::{AsyncValue, BoxFuture, Value};
