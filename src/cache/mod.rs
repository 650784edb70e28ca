//! The managed cache boundary used by the server's tools.
mod memory;

pub use memory::MemoryCache;

use std::time::Duration;
use thiserror::Error;

/// TTL applied when a caller does not pick one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid TTL: {0:?} is out of range")]
    InvalidTtl(Duration),
    #[error("Cache request failed: {0}")]
    Request(String),
}

pub trait CacheClient: Send + Sync {
    /// `Ok(None)` on a miss.
    fn get(&self, cache_name: &str, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`. `None` or a zero TTL means the client's
    /// default TTL.
    fn set(
        &self,
        cache_name: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Deleting a key that does not exist succeeds.
    fn delete(&self, cache_name: &str, key: &str) -> Result<(), CacheError>;
}
