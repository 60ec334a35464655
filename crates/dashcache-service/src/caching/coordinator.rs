use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheContents;
use super::cache_key::CacheKey;
use super::store::{CacheStore, Lookup};

/// Options for [`FreshnessCoordinator::read`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Serve an expired entry immediately and revalidate it in the
    /// background, instead of blocking on a fetch.
    pub allow_stale: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { allow_stale: true }
    }
}

/// The read path used by every dashboard query.
///
/// Decides per request whether to serve from cache, serve stale data while
/// revalidating in the background, or block on a network fetch. This is the
/// only component aware that a network exists; the actual round-trip is the
/// caller-supplied `fetcher`, including any timeout it wants to enforce.
///
/// Per key, the coordinator is a two-state machine: `IDLE` or
/// `REVALIDATING`. The set of revalidating keys lives in memory only; after
/// a process restart every key is `IDLE` again, which at worst costs one
/// redundant revalidation.
#[derive(Debug, Clone)]
pub struct FreshnessCoordinator {
    store: Arc<CacheStore>,
    revalidating: Arc<Mutex<HashSet<CacheKey>>>,
}

impl FreshnessCoordinator {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            revalidating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Reads a value, going to the network only when the cache cannot serve.
    ///
    /// * A fresh cached value returns immediately.
    /// * A miss blocks on `fetcher`; its result is written through on
    ///   success, and its error is the caller's to handle (there is nothing
    ///   to fall back on).
    /// * An expired value with `allow_stale` returns immediately and, if no
    ///   revalidation for this key is in flight, launches one in the
    ///   background. At most one background fetch runs per key; its failure
    ///   is logged, never surfaced, because the caller already got a usable
    ///   response.
    /// * An expired value without `allow_stale` is treated as a miss.
    pub async fn read<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetcher: F,
        options: ReadOptions,
    ) -> CacheContents<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        match self.store.lookup::<T>(key).await {
            Lookup::Fresh(value) => Ok(value),
            Lookup::Stale(value) if options.allow_stale => {
                self.spawn_revalidation(key, fetcher);
                Ok(value)
            }
            Lookup::Stale(_) | Lookup::Miss => self.fetch_and_store(key, fetcher()).await,
        }
    }

    /// User-triggered refresh: always fetches, regardless of cache state.
    ///
    /// Takes precedence over any background revalidation already running for
    /// the key; that one is left to finish and its write is inert
    /// last-writer-wins. Fetch errors surface to the caller.
    pub async fn refresh<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> CacheContents<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        self.fetch_and_store(key, fetcher()).await
    }

    async fn fetch_and_store<T, Fut>(&self, key: &CacheKey, fetch: Fut) -> CacheContents<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        let value = fetch.await?;
        self.store.set(key, &value).await;
        Ok(value)
    }

    /// Launches a deduplicated background revalidation for the key.
    ///
    /// The `REVALIDATING` marker is taken before the task is spawned, so a
    /// second caller arriving between spawn and completion sees it and skips.
    /// A drop guard returns the key to `IDLE` however the task ends.
    fn spawn_revalidation<T, F, Fut>(&self, key: &CacheKey, fetcher: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        {
            let mut revalidating = self.revalidating.lock().unwrap();
            if !revalidating.insert(key.clone()) {
                // already in flight, the running fetch will serve everyone
                return;
            }
        }

        let idle_token = ClearOnDrop {
            keys: Arc::clone(&self.revalidating),
            key: key.clone(),
        };
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let fetch = fetcher();

        tracing::trace!(%key, "spawning background revalidation");
        tokio::spawn(async move {
            let _idle_token = idle_token;

            match fetch.await {
                Ok(value) => store.set(&key, &value).await,
                Err(error) => {
                    // the caller already received the stale value; keep it as
                    // the last-known value until the next attempt
                    tracing::warn!(%key, %error, "background revalidation failed");
                }
            }
        });
    }
}

/// Returns a key to `IDLE` when dropped.
struct ClearOnDrop {
    keys: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.keys.lock().unwrap().remove(&self.key);
    }
}
