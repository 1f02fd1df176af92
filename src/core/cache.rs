use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Outcome of an in-flight fetch as seen by the callers waiting on it.
/// `None` until the fetching caller publishes; errors travel as their message.
type Slot<V> = watch::Receiver<Option<Result<V, String>>>;

type InflightMap<K, V> = StdMutex<HashMap<K, Slot<V>>>;

fn lock_inflight<K, V>(inflight: &InflightMap<K, V>) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases a key's in-flight slot when the fetching caller finishes or is
/// dropped mid-fetch.
struct InflightGuard<'a, K: Eq + Hash, V> {
    inflight: &'a InflightMap<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for InflightGuard<'_, K, V> {
    fn drop(&mut self) {
        lock_inflight(self.inflight).remove(&self.key);
    }
}

/// In-memory key-value cache where every entry lives for a fixed TTL.
///
/// Expired entries are evicted lazily by the lookup that finds them; there is
/// no background sweep. Concurrent misses for the same key can be coalesced
/// through [`TtlCache::get_or_try_insert_with`].
pub struct TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    inflight: InflightMap<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() > self.ttl => true,
            Some(entry) => {
                debug!("Cache HIT for key: {:?}", key);
                return Some(entry.value.clone());
            }
            None => false,
        };

        if expired {
            entries.remove(key);
            debug!("Cache entry expired for key: {:?}", key);
        } else {
            debug!("Cache MISS for key: {:?}", key);
        }
        None
    }

    pub async fn set(&self, key: K, value: V) {
        let mut entries = self.entries.lock().await;
        debug!("Cache SET for key: {:?}", key);
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, key: &K) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        debug!("Cache REMOVE for key: {:?}", key);
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        debug!("Cache CLEAR");
    }

    /// Number of stored entries, expired ones included until they are looked up.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Returns the cached value or runs `fetch` to produce it.
    ///
    /// The first caller to miss on a key runs `fetch`; callers missing on the
    /// same key meanwhile wait for it and receive the same outcome, so a burst
    /// of requests costs one upstream call whether it succeeds or fails.
    /// Errors are never stored. If the fetching caller is dropped before it
    /// finishes, a waiting caller takes over the fetch.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let publisher = loop {
            if let Some(value) = self.get(&key).await {
                return Ok(value);
            }

            let mut slot = {
                let mut inflight = lock_inflight(&self.inflight);
                match inflight.get(&key) {
                    Some(slot) => slot.clone(),
                    None => {
                        let (publisher, slot) = watch::channel(None);
                        inflight.insert(key.clone(), slot);
                        break publisher;
                    }
                }
            };

            debug!("Waiting on in-flight fetch for key: {:?}", key);
            if let Ok(outcome) = slot.wait_for(Option::is_some).await {
                return match &*outcome {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(message)) => Err(anyhow!("{}", message)),
                    None => Err(anyhow!("In-flight fetch for {:?} published nothing", key)),
                };
            }
            debug!("In-flight fetch for key {:?} was abandoned", key);
        };

        let _guard = InflightGuard {
            inflight: &self.inflight,
            key: key.clone(),
        };
        let result = fetch().await;
        match &result {
            Ok(value) => {
                self.set(key.clone(), value.clone()).await;
                publisher.send_replace(Some(Ok(value.clone())));
            }
            Err(error) => {
                publisher.send_replace(Some(Err(format!("{error:#}"))));
            }
        }
        result
    }
}
