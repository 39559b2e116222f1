//! The sharded dispatcher.
//!
//! A [`Store`] owns a fixed vector of [`Node`]s and routes every operation to
//! one of them by hashing the key's canonical string. Shards are fully
//! independent; the dispatcher holds no locks across node calls, which is
//! what lets uniformly distributed keys scale across shards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use swiftstore_core::{encode_item, encode_key, route_hash, Item, Key, KeyProvider};

use crate::client::TableClient;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::node::{FlushFailure, Node};

/// Write-back caching façade over a remote table.
///
/// Reads are served from per-shard caches where possible; writes are applied
/// to the cache immediately and drained to the backing store by per-shard
/// flush workers. Per key, operations are serialized by the owning shard.
///
/// Construction spawns the flush workers, so a `Store` must be created inside
/// a tokio runtime.
pub struct Store {
    nodes: Vec<Node>,
    failures: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<FlushFailure>>>,
}

impl Store {
    /// Creates a store over `table` with the default [`StoreConfig`].
    #[must_use]
    pub fn new(client: Arc<dyn TableClient>, table: impl Into<String>) -> Self {
        Self::with_config(client, table, StoreConfig::default())
    }

    /// Creates a store with an explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if `num_shards`, `queue_capacity`, or `cache_capacity` is zero.
    #[must_use]
    pub fn with_config(
        client: Arc<dyn TableClient>,
        table: impl Into<String>,
        config: StoreConfig,
    ) -> Self {
        assert!(config.num_shards > 0, "num_shards must be positive");
        let table = table.into();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let nodes = (0..config.num_shards)
            .map(|index| {
                Node::new(
                    Arc::clone(&client),
                    table.clone(),
                    &config,
                    index,
                    Some(failure_tx.clone()),
                )
            })
            .collect();
        Self {
            nodes,
            failures: parking_lot::Mutex::new(Some(failure_rx)),
        }
    }

    /// Number of shards keys are routed across.
    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.nodes.len()
    }

    /// The stream of asynchronous flush failures.
    ///
    /// Each failure carries the mutations dropped when a shard's worker
    /// stopped on a write error. Can be taken once; afterwards returns
    /// `None`. Failures are also logged whether or not the stream is
    /// consumed.
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<FlushFailure>> {
        self.failures.lock().take()
    }

    /// Creates the item; fails with [`StoreError::ItemExisted`] if the key is
    /// already present.
    pub async fn insert<K, T>(&self, key: &K, value: &T) -> Result<(), StoreError>
    where
        K: KeyProvider,
        T: Serialize,
    {
        let key = key.storage_key();
        let item = encode_item(&key, value)?;
        self.node_for(&key).insert(&key, item).await
    }

    /// Creates or replaces the item unconditionally.
    pub async fn upsert<K, T>(&self, key: &K, value: &T) -> Result<(), StoreError>
    where
        K: KeyProvider,
        T: Serialize,
    {
        let key = key.storage_key();
        let item = encode_item(&key, value)?;
        self.node_for(&key).upsert(&key, item).await
    }

    /// Replaces the item; fails with [`StoreError::ItemNotExisted`] if the
    /// key is absent.
    pub async fn update<K, T>(&self, key: &K, value: &T) -> Result<(), StoreError>
    where
        K: KeyProvider,
        T: Serialize,
    {
        let key = key.storage_key();
        let item = encode_item(&key, value)?;
        self.node_for(&key).update(&key, item).await
    }

    /// Removes the item. Deleting an absent key succeeds.
    pub async fn delete<K: KeyProvider>(&self, key: &K) -> Result<(), StoreError> {
        let key = key.storage_key();
        let key_item = encode_key(&key)?;
        self.node_for(&key).delete(&key, key_item).await
    }

    /// Reads the item's attributes, fetching from the backing store on a
    /// cache miss. Fails with [`StoreError::ItemNotExisted`] for absent keys.
    pub async fn get(&self, key: &Key) -> Result<Arc<Item>, StoreError> {
        self.node_for(key).get(key).await
    }

    /// Reads many keys at once, fanned out per shard with batched fetches.
    /// Absent keys are simply missing from the result; the first shard
    /// failure fails the whole call.
    pub async fn get_multi(&self, keys: &[Key]) -> Result<HashMap<Key, Arc<Item>>, StoreError> {
        let mut buckets: Vec<Vec<Key>> = vec![Vec::new(); self.nodes.len()];
        let mut seen = HashSet::new();
        for key in keys {
            if seen.insert(key.clone()) {
                buckets[self.shard_of(key)].push(key.clone());
            }
        }

        let mut items = HashMap::with_capacity(seen.len());
        for (index, bucket) in buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let resolved = self.nodes[index].get_multi(bucket).await?;
            items.extend(resolved);
        }
        Ok(items)
    }

    /// Whether an item is stored under `key`.
    pub async fn exists(&self, key: &Key) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::ItemNotExisted { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Closes every shard, then waits for every flush worker to finish
    /// draining. Mutations already enqueued still reach the backing store;
    /// operations submitted afterwards fail with [`StoreError::Closed`].
    pub async fn close_and_wait(&self) {
        for node in &self.nodes {
            node.close().await;
        }
        for node in &self.nodes {
            node.wait_closed().await;
        }
    }

    fn shard_of(&self, key: &Key) -> usize {
        (route_hash(&key.canonical()) % self.nodes.len() as u64) as usize
    }

    fn node_for(&self, key: &Key) -> &Node {
        &self.nodes[self.shard_of(key)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryTableClient;
    use std::time::Duration;

    fn small_config() -> StoreConfig {
        StoreConfig {
            num_shards: 4,
            queue_capacity: 64,
            flush_threshold: 8,
            cache_capacity: 64,
            cond_set_capacity: 8,
            remote_timeout: Duration::from_secs(5),
            batch_get_size: 100,
        }
    }

    fn store_with(client: &Arc<MemoryTableClient>, config: StoreConfig) -> Store {
        Store::with_config(Arc::clone(client) as Arc<dyn TableClient>, "t", config)
    }

    #[tokio::test]
    async fn routing_is_stable_and_in_range() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());

        for i in 0..200 {
            let key = Key::root("itm", format!("K{i}"));
            let shard = store.shard_of(&key);
            assert!(shard < store.num_shards());
            assert_eq!(store.shard_of(&key), shard, "routing must be stable");
        }
        store.close_and_wait().await;
    }

    #[tokio::test]
    async fn exists_maps_absence_to_false() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());
        let key = Key::root("itm", "A");

        assert!(!store.exists(&key).await.unwrap());
        store
            .upsert(&key, &serde_json::json!({ "name": "x" }))
            .await
            .unwrap();
        assert!(store.exists(&key).await.unwrap());
        store.close_and_wait().await;
    }

    #[tokio::test]
    async fn incomplete_keys_are_serialize_errors() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());
        let key = Key::default();

        let err = store
            .upsert(&key, &serde_json::json!({ "name": "x" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SerializeException");
        store.close_and_wait().await;
    }

    #[tokio::test]
    async fn get_multi_dedupes_requested_keys() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());
        let key = Key::root("itm", "A");
        store
            .upsert(&key, &serde_json::json!({ "name": "x" }))
            .await
            .unwrap();

        let out = store
            .get_multi(&[key.clone(), key.clone(), key.clone()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        store.close_and_wait().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());
        let key = Key::root("itm", "A");

        store.close_and_wait().await;
        store.close_and_wait().await;

        let err = store
            .upsert(&key, &serde_json::json!({ "name": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn take_failures_yields_once() {
        let client = Arc::new(MemoryTableClient::new());
        let store = store_with(&client, small_config());
        assert!(store.take_failures().is_some());
        assert!(store.take_failures().is_none());
        store.close_and_wait().await;
    }

    #[test]
    #[should_panic(expected = "num_shards must be positive")]
    fn zero_shards_panics() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let client = Arc::new(MemoryTableClient::new()) as Arc<dyn TableClient>;
        let _ = Store::with_config(
            client,
            "t",
            StoreConfig {
                num_shards: 0,
                ..StoreConfig::default()
            },
        );
    }
}
