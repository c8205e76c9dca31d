//! CacheMap - An associative cache with staleness-driven invalidation
//!
//! Extends a plain key/value map with conditional writes: a value is only
//! stored when its key is absent, or when the staleness record registered for
//! the key (a duration, a moment, or a custom predicate) says the cached
//! entry must go.

pub mod cache;
pub mod config;
pub mod error;
pub mod shared;

pub use cache::{AsyncValue, CacheMap, CacheStats, Expiration, Staleness, Value};
pub use config::Config;
pub use error::{CacheError, Result};
pub use shared::SharedCacheMap;
