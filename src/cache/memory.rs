use super::{CacheClient, CacheError, DEFAULT_TTL};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache. Any cache name is accepted and names are independent
/// namespaces. Expired entries are dropped when next read, and every `set`
/// sweeps out whatever else has expired.
pub struct MemoryCache {
    default_ttl: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MemoryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, String), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".into()));
    }
    Ok(())
}

impl CacheClient for MemoryCache {
    fn get(&self, cache_name: &str, key: &str) -> Result<Option<String>, CacheError> {
        check_key(key)?;
        let id = (cache_name.to_owned(), key.to_owned());
        let mut entries = self.entries();
        match entries.get(&id) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                trace!("cache: {} expired", key);
                entries.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(
        &self,
        cache_name: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        check_key(key)?;
        let ttl = match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => self.default_ttl,
        };
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or(CacheError::InvalidTtl(ttl))?;

        let mut entries = self.entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            (cache_name.to_owned(), key.to_owned()),
            Entry {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, cache_name: &str, key: &str) -> Result<(), CacheError> {
        check_key(key)?;
        self.entries()
            .remove(&(cache_name.to_owned(), key.to_owned()));
        Ok(())
    }
}
