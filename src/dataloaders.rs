//! DataLoader utilities for batch loading
//!
//! Implements the DataLoader pattern for preventing N+1 query problems.
//! See: https://github.com/graphql/dataloader
//!
//! Keys requested before a batch is dispatched are coalesced into a single
//! [`BatchLoader::load_batch`] call. Once a batch is dispatched it is closed:
//! a request for a key it is already fetching joins it, any other key starts
//! the next batch.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::config::LoaderConfig;
use crate::source::SourceError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Batch load was aborted before completing")]
    Aborted,
}

/// Batch loader trait for loading multiple items at once
#[async_trait]
pub trait BatchLoader<K, V>: Send + Sync
where
    K: Send + Sync + Clone + Eq + Hash,
    V: Send + Sync + Clone,
{
    /// Load batch of items by keys
    ///
    /// This method should fetch all items for the given keys in a single
    /// database query or API call. Keys absent from the returned map are
    /// treated as missing.
    async fn load_batch(&self, keys: &[K]) -> Result<HashMap<K, V>, SourceError>;
}

type Reply<V> = oneshot::Sender<Result<Option<V>, LoadError>>;

struct LoaderState<K, V> {
    /// Resolved values, including confirmed misses
    cache: HashMap<K, Option<V>>,
    /// Keys collected for the next dispatch, in request order
    queue: Vec<K>,
    queued: HashMap<K, Vec<Reply<V>>>,
    /// Batch whose result for a key may still be cached
    joinable: HashMap<K, u64>,
    in_flight: HashMap<(u64, K), Vec<Reply<V>>>,
    next_batch: u64,
}

impl<K, V> Default for LoaderState<K, V> {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            queue: Vec::new(),
            queued: HashMap::new(),
            joinable: HashMap::new(),
            in_flight: HashMap::new(),
            next_batch: 0,
        }
    }
}

enum Lookup<V> {
    Ready(Option<V>),
    Waiting(oneshot::Receiver<Result<Option<V>, LoadError>>),
}

impl<K, V> LoaderState<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Returns the lookup and whether a dispatcher must be scheduled
    fn enqueue(&mut self, key: K) -> (Lookup<V>, bool) {
        if let Some(value) = self.cache.get(&key) {
            return (Lookup::Ready(value.clone()), false);
        }

        let (tx, rx) = oneshot::channel();
        if let Some(batch) = self.joinable.get(&key).copied() {
            if let Some(replies) = self.in_flight.get_mut(&(batch, key.clone())) {
                replies.push(tx);
                return (Lookup::Waiting(rx), false);
            }
        }

        // A dispatcher is pending whenever the queue is non-empty
        let first_in_queue = self.queue.is_empty();
        match self.queued.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(tx);
                (Lookup::Waiting(rx), false)
            }
            Entry::Vacant(entry) => {
                self.queue.push(entry.key().clone());
                entry.insert(vec![tx]);
                (Lookup::Waiting(rx), first_in_queue)
            }
        }
    }
}

/// DataLoader with caching and batching
///
/// One instance serves one request; its cache is never shared across requests.
pub struct DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    loader: Arc<L>,
    state: Arc<Mutex<LoaderState<K, V>>>,
    config: LoaderConfig,
}

impl<K, V, L> DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    /// Create new DataLoader with a batch loader
    pub fn new(loader: L) -> Self {
        Self::with_config(loader, LoaderConfig::default())
    }

    pub fn with_config(loader: L, config: LoaderConfig) -> Self {
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(LoaderState::default())),
            config,
        }
    }

    /// Load a single item by key
    ///
    /// `Ok(None)` means the key does not exist.
    pub async fn load(&self, key: K) -> Result<Option<V>, LoadError> {
        let (lookup, schedule) = {
            let mut state = self.state.lock().await;
            state.enqueue(key)
        };
        if schedule {
            self.schedule_dispatch();
        }
        Self::resolve(lookup).await
    }

    /// Load multiple items by keys, preserving order
    ///
    /// All uncached keys land in the same batch.
    pub async fn load_many(&self, keys: &[K]) -> Result<Vec<Option<V>>, LoadError> {
        let mut schedule = false;
        let lookups: Vec<Lookup<V>> = {
            let mut state = self.state.lock().await;
            keys.iter()
                .map(|key| {
                    let (lookup, first) = state.enqueue(key.clone());
                    schedule |= first;
                    lookup
                })
                .collect()
        };
        if schedule {
            self.schedule_dispatch();
        }

        let mut values = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            values.push(Self::resolve(lookup).await?);
        }
        Ok(values)
    }

    /// Cached value without triggering a load
    pub async fn get_cached(&self, key: &K) -> Option<Option<V>> {
        self.state.lock().await.cache.get(key).cloned()
    }

    /// Prime the cache with a value
    ///
    /// Waiters on the key get the primed value and a queued fetch of it is
    /// dropped. Overrides whatever an in-flight batch later returns for the key.
    pub async fn prime(&self, key: K, value: V) {
        let mut state = self.state.lock().await;
        let mut replies = state.queued.remove(&key).unwrap_or_default();
        if !replies.is_empty() {
            state.queue.retain(|queued| queued != &key);
        }
        if let Some(batch) = state.joinable.remove(&key) {
            replies.extend(state.in_flight.remove(&(batch, key.clone())).unwrap_or_default());
        }
        for reply in replies {
            let _ = reply.send(Ok(Some(value.clone())));
        }
        state.cache.insert(key, Some(value));
    }

    /// Forget one key; an in-flight fetch of it is not written back
    pub async fn invalidate(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.cache.remove(key);
        state.joinable.remove(key);
    }

    /// Clear the cache
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.cache.clear();
        state.joinable.clear();
    }

    async fn resolve(lookup: Lookup<V>) -> Result<Option<V>, LoadError> {
        match lookup {
            Lookup::Ready(value) => Ok(value),
            Lookup::Waiting(rx) => rx.await.unwrap_or(Err(LoadError::Aborted)),
        }
    }

    fn schedule_dispatch(&self) {
        let loader = self.loader.clone();
        let state = self.state.clone();
        let config = self.config.clone();
        tokio::spawn(dispatch(loader, state, config));
    }
}

/// Close the current batch after the collection window and fetch it
async fn dispatch<K, V, L>(loader: Arc<L>, state: Arc<Mutex<LoaderState<K, V>>>, config: LoaderConfig)
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    for _ in 0..config.batch_yields {
        tokio::task::yield_now().await;
    }

    let (batch, keys) = {
        let mut state = state.lock().await;
        let batch = state.next_batch;
        state.next_batch += 1;
        let keys = std::mem::take(&mut state.queue);
        for key in &keys {
            let replies = state.queued.remove(key).unwrap_or_default();
            state.joinable.insert(key.clone(), batch);
            state.in_flight.insert((batch, key.clone()), replies);
        }
        (batch, keys)
    };
    if keys.is_empty() {
        return;
    }

    tracing::debug!(batch, keys = keys.len(), "Dispatching load batch");

    for chunk in keys.chunks(config.max_batch_size.max(1)) {
        // Run on its own task so a panicking loader fails the waiters instead of stranding them
        let fetch = {
            let loader = loader.clone();
            let chunk = chunk.to_vec();
            tokio::spawn(async move { loader.load_batch(&chunk).await })
        };
        let result = match fetch.await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(e)) => Err(LoadError::Source(e)),
            Err(_) => Err(LoadError::Aborted),
        };

        let mut state = state.lock().await;
        for key in chunk {
            let outcome = match &result {
                Ok(found) => Ok(found.get(key).cloned()),
                Err(e) => Err(e.clone()),
            };
            if state.joinable.get(key) == Some(&batch) {
                state.joinable.remove(key);
                if let Ok(value) = &outcome {
                    state.cache.insert(key.clone(), value.clone());
                }
            }
            for reply in state
                .in_flight
                .remove(&(batch, key.clone()))
                .unwrap_or_default()
            {
                let _ = reply.send(outcome.clone());
            }
        }
    }
}

impl<K, V, L> Clone for DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Semaphore};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct TestLoader {
        calls: StdMutex<Vec<Vec<u32>>>,
        fail: StdMutex<bool>,
    }

    impl TestLoader {
        fn calls(&self) -> Vec<Vec<u32>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchLoader<u32, String> for TestLoader {
        async fn load_batch(&self, keys: &[u32]) -> Result<HashMap<u32, String>, SourceError> {
            self.calls.lock().unwrap().push(keys.to_vec());
            if *self.fail.lock().unwrap() {
                return Err(SourceError::Unavailable("down".to_string()));
            }
            // odd keys exist, even keys are missing
            Ok(keys
                .iter()
                .filter(|k| *k % 2 == 1)
                .map(|k| (*k, format!("value-{}", k)))
                .collect())
        }
    }

    fn calls_of(loader: &DataLoader<u32, String, TestLoader>) -> Vec<Vec<u32>> {
        loader.loader.calls()
    }

    #[tokio::test]
    async fn test_dataloader_single_load() {
        let loader = DataLoader::new(TestLoader::default());
        let value = assert_ok!(loader.load(1).await);
        assert_eq!(value, Some("value-1".to_string()));
    }

    #[tokio::test]
    async fn test_dataloader_caching() {
        let loader = DataLoader::new(TestLoader::default());

        assert_eq!(loader.load(1).await, Ok(Some("value-1".to_string())));
        // Second load should hit cache
        assert_eq!(loader.load(1).await, Ok(Some("value-1".to_string())));
        assert_eq!(calls_of(&loader), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_dataloader_missing_keys_are_cached_as_none() {
        let loader = DataLoader::new(TestLoader::default());
        assert_eq!(loader.load(2).await, Ok(None));
        assert_eq!(loader.load(2).await, Ok(None));
        assert_eq!(loader.get_cached(&2).await, Some(None));
        assert_eq!(calls_of(&loader), vec![vec![2]]);
    }

    #[tokio::test]
    async fn test_dataloader_coalesces_concurrent_loads() {
        let loader = DataLoader::new(TestLoader::default());
        let (a, b, c) = tokio::join!(loader.load(1), loader.load(3), loader.load(5));
        assert_eq!(a, Ok(Some("value-1".to_string())));
        assert_eq!(b, Ok(Some("value-3".to_string())));
        assert_eq!(c, Ok(Some("value-5".to_string())));
        assert_eq!(calls_of(&loader), vec![vec![1, 3, 5]]);
    }

    #[tokio::test]
    async fn test_dataloader_dedups_concurrent_same_key() {
        let loader = DataLoader::new(TestLoader::default());
        let (a, b, c) = tokio::join!(loader.load(7), loader.load(7), loader.load(7));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(calls_of(&loader), vec![vec![7]]);
    }

    #[tokio::test]
    async fn test_dataloader_batch_load() {
        let loader = DataLoader::new(TestLoader::default());
        let results = loader.load_many(&[3, 2, 1, 3]).await.unwrap();

        assert_eq!(
            results,
            vec![
                Some("value-3".to_string()),
                None,
                Some("value-1".to_string()),
                Some("value-3".to_string()),
            ]
        );
        assert_eq!(calls_of(&loader), vec![vec![3, 2, 1]]);
    }

    #[tokio::test]
    async fn test_dataloader_splits_large_batches() {
        let config = LoaderConfig {
            batch_yields: 1,
            max_batch_size: 2,
        };
        let loader = DataLoader::with_config(TestLoader::default(), config);
        let results = loader.load_many(&[1, 3, 5, 7, 9]).await.unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(calls_of(&loader), vec![vec![1, 3], vec![5, 7], vec![9]]);
    }

    #[tokio::test]
    async fn test_dataloader_errors_are_not_cached() {
        let loader = DataLoader::new(TestLoader::default());
        *loader.loader.fail.lock().unwrap() = true;
        let err = assert_err!(loader.load(1).await);
        assert_eq!(
            err,
            LoadError::Source(SourceError::Unavailable("down".to_string()))
        );

        *loader.loader.fail.lock().unwrap() = false;
        assert_eq!(loader.load(1).await, Ok(Some("value-1".to_string())));
        assert_eq!(calls_of(&loader), vec![vec![1], vec![1]]);
    }

    #[tokio::test]
    async fn test_dataloader_prime() {
        let loader = DataLoader::new(TestLoader::default());

        // Prime cache with value
        loader.prime(1, "custom-value".to_string()).await;

        // Load should return primed value
        let value = loader.load(1).await;
        assert_eq!(value, Ok(Some("custom-value".to_string())));
        assert!(calls_of(&loader).is_empty());
    }

    #[tokio::test]
    async fn test_dataloader_prime_answers_queued_load() {
        let loader = DataLoader::new(TestLoader::default());

        // The load is queued but its batch has not been dispatched yet
        let (loaded, ()) = tokio::join!(loader.load(1), loader.prime(1, "edited".to_string()));
        assert_eq!(loaded, Ok(Some("edited".to_string())));

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.load(1).await, Ok(Some("edited".to_string())));
        assert!(calls_of(&loader).is_empty());
    }

    #[tokio::test]
    async fn test_dataloader_invalidate_and_clear() {
        let loader = DataLoader::new(TestLoader::default());
        loader.load(1).await.unwrap();
        loader.load(3).await.unwrap();

        loader.invalidate(&1).await;
        assert_eq!(loader.get_cached(&1).await, None);
        assert_eq!(loader.get_cached(&3).await, Some(Some("value-3".to_string())));

        loader.clear().await;
        loader.load(3).await.unwrap();
        assert_eq!(calls_of(&loader), vec![vec![1], vec![3], vec![3]]);
    }

    struct GatedLoader {
        calls: StdMutex<Vec<Vec<u32>>>,
        started: mpsc::UnboundedSender<()>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl BatchLoader<u32, u32> for GatedLoader {
        async fn load_batch(&self, keys: &[u32]) -> Result<HashMap<u32, u32>, SourceError> {
            self.calls.lock().unwrap().push(keys.to_vec());
            let _ = self.started.send(());
            let _permit = self.gate.acquire().await;
            Ok(keys.iter().map(|k| (*k, k * 10)).collect())
        }
    }

    #[tokio::test]
    async fn test_dataloader_late_requests_join_or_start_next_batch() {
        let (loader, mut started_rx, gate) = gated_loader();

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        started_rx.recv().await.unwrap();

        // Batch [1] is running: key 1 joins it, key 2 opens the next batch
        let joined = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        let next = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(2).await }
        });
        started_rx.recv().await.unwrap();
        gate.add_permits(2);

        assert_eq!(first.await.unwrap(), Ok(Some(10)));
        assert_eq!(joined.await.unwrap(), Ok(Some(10)));
        assert_eq!(next.await.unwrap(), Ok(Some(20)));
        assert_eq!(
            loader.loader.calls.lock().unwrap().clone(),
            vec![vec![1], vec![2]]
        );
    }

    fn gated_loader() -> (
        DataLoader<u32, u32, GatedLoader>,
        mpsc::UnboundedReceiver<()>,
        Arc<Semaphore>,
    ) {
        let gate = Arc::new(Semaphore::new(0));
        let (started, started_rx) = mpsc::unbounded_channel();
        let loader = DataLoader::new(GatedLoader {
            calls: StdMutex::new(Vec::new()),
            started,
            gate: gate.clone(),
        });
        (loader, started_rx, gate)
    }

    #[tokio::test]
    async fn test_dataloader_invalidate_drops_in_flight_result() {
        let (loader, mut started_rx, gate) = gated_loader();

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        started_rx.recv().await.unwrap();

        loader.invalidate(&1).await;
        gate.add_permits(1);

        // The waiter still gets its answer, the cache does not
        assert_eq!(first.await.unwrap(), Ok(Some(10)));
        assert_eq!(loader.get_cached(&1).await, None);

        assert_eq!(loader.load(1).await, Ok(Some(10)));
        assert_eq!(
            loader.loader.calls.lock().unwrap().clone(),
            vec![vec![1], vec![1]]
        );
    }

    #[tokio::test]
    async fn test_dataloader_prime_overrides_in_flight_batch() {
        let (loader, mut started_rx, gate) = gated_loader();

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        started_rx.recv().await.unwrap();

        loader.prime(1, 99).await;
        assert_eq!(first.await.unwrap(), Ok(Some(99)));

        gate.add_permits(1);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.get_cached(&1).await, Some(Some(99)));
        assert_eq!(loader.load(1).await, Ok(Some(99)));
    }
}
