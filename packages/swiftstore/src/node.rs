//! The per-shard state machine: cache, mutation queue, and flush worker.
//!
//! A [`Node`] owns one mutex guarding its LRU cache, its pending-mutation
//! ring, its per-key fetch waits, and its closed flag. Every public operation
//! runs under that mutex; the only concurrency inside a shard is the flush
//! worker draining the queue and the single-flight fetch tasks populating
//! the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error};

use swiftstore_core::{encode_key, AttrValue, Item, Key, KEY_ATTRIBUTE};

use crate::cache::{CacheEntry, EntryCache};
use crate::client::TableClient;
use crate::condset::CondSet;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::queue::RingQueue;
use crate::sync::Condvar;

/// Pending-write opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// Create; fails upstream when the key already exists.
    Insert,
    /// Create or replace.
    Upsert,
    /// Replace; fails upstream when the key does not exist.
    Update,
    /// Remove.
    Delete,
}

/// One pending write awaiting flush.
///
/// Insert/upsert/update carry the full encoded item; delete carries the
/// `_key`-only item. The attributes are immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub(crate) op: MutationOp,
    pub(crate) attrs: Arc<Item>,
}

impl Mutation {
    /// The operation this mutation performs.
    #[must_use]
    pub fn op(&self) -> MutationOp {
        self.op
    }

    /// The encoded attributes the mutation carries.
    #[must_use]
    pub fn attributes(&self) -> &Item {
        &self.attrs
    }
}

/// Report of a failed flush: the write that failed plus every mutation
/// abandoned behind it.
#[derive(Debug)]
pub struct FlushFailure {
    /// The failure that stopped the shard's worker.
    pub error: StoreError,
    /// The failed mutation followed by everything still pending, in enqueue
    /// order.
    pub abandoned: Vec<Mutation>,
}

pub(crate) type FailureSender = mpsc::UnboundedSender<FlushFailure>;

/// State guarded by the node mutex.
struct NodeState {
    cache: EntryCache,
    queue: RingQueue,
    fetch_waits: CondSet,
    closed: bool,
}

/// Everything a node shares with its flush worker and fetch tasks.
struct NodeShared {
    client: Arc<dyn TableClient>,
    table: String,
    index: usize,
    flush_threshold: usize,
    remote_timeout: Duration,
    batch_get_size: usize,
    state: Mutex<NodeState>,
    /// Producers blocked on a full queue.
    not_full: Condvar,
    /// Wakes the flush worker at the threshold or on close.
    flush_cond: Condvar,
    failure_tx: Option<FailureSender>,
}

/// One shard of the store.
pub(crate) struct Node {
    shared: Arc<NodeShared>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Creates the shard and spawns its flush worker. Must run inside a
    /// tokio runtime.
    pub(crate) fn new(
        client: Arc<dyn TableClient>,
        table: String,
        config: &StoreConfig,
        index: usize,
        failure_tx: Option<FailureSender>,
    ) -> Self {
        let shared = Arc::new(NodeShared {
            client,
            table,
            index,
            flush_threshold: config.effective_flush_threshold(),
            remote_timeout: config.remote_timeout,
            batch_get_size: config.batch_get_size,
            state: Mutex::new(NodeState {
                cache: EntryCache::new(config.cache_capacity),
                queue: RingQueue::new(config.queue_capacity),
                fetch_waits: CondSet::new(config.cond_set_capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            flush_cond: Condvar::new(),
            failure_tx,
        });
        let worker = tokio::spawn(flush_worker(Arc::clone(&shared)));
        Self {
            shared,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// Creates the item if absent; [`StoreError::ItemExisted`] otherwise.
    pub(crate) async fn insert(&self, key: &Key, item: Item) -> Result<(), StoreError> {
        let attrs = Arc::new(item);
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        let (state, existing) = NodeShared::get_or_fetch(&self.shared, state, key).await?;
        if existing.is_some() {
            return Err(StoreError::ItemExisted { key: key.clone() });
        }
        self.shared
            .enqueue(
                state,
                key,
                Mutation {
                    op: MutationOp::Insert,
                    attrs,
                },
            )
            .await;
        Ok(())
    }

    /// Creates or replaces the item without consulting its current state.
    pub(crate) async fn upsert(&self, key: &Key, item: Item) -> Result<(), StoreError> {
        let attrs = Arc::new(item);
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        self.shared
            .enqueue(
                state,
                key,
                Mutation {
                    op: MutationOp::Upsert,
                    attrs,
                },
            )
            .await;
        Ok(())
    }

    /// Replaces the item if present; [`StoreError::ItemNotExisted`] otherwise.
    pub(crate) async fn update(&self, key: &Key, item: Item) -> Result<(), StoreError> {
        let attrs = Arc::new(item);
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        let (state, existing) = NodeShared::get_or_fetch(&self.shared, state, key).await?;
        if existing.is_none() {
            return Err(StoreError::ItemNotExisted { key: key.clone() });
        }
        self.shared
            .enqueue(
                state,
                key,
                Mutation {
                    op: MutationOp::Update,
                    attrs,
                },
            )
            .await;
        Ok(())
    }

    /// Removes the item without consulting its current state.
    pub(crate) async fn delete(&self, key: &Key, key_item: Item) -> Result<(), StoreError> {
        let attrs = Arc::new(key_item);
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        self.shared
            .enqueue(
                state,
                key,
                Mutation {
                    op: MutationOp::Delete,
                    attrs,
                },
            )
            .await;
        Ok(())
    }

    /// Reads the item, fetching from the backing store on a cache miss.
    pub(crate) async fn get(&self, key: &Key) -> Result<Arc<Item>, StoreError> {
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        let (_state, existing) = NodeShared::get_or_fetch(&self.shared, state, key).await?;
        existing.ok_or_else(|| StoreError::ItemNotExisted { key: key.clone() })
    }

    /// Reads many items at once; absent keys are simply missing from the
    /// result.
    pub(crate) async fn get_multi(
        &self,
        keys: &[Key],
    ) -> Result<HashMap<Key, Arc<Item>>, StoreError> {
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        let resolved = self.shared.get_or_fetch_multi(state, keys).await?;
        Ok(resolved
            .into_iter()
            .filter_map(|(key, entry)| entry.map(|attrs| (key, attrs)))
            .collect())
    }

    /// Marks the shard closed and wakes the flush worker for its final
    /// drain. Returns immediately; pair with [`wait_closed`](Self::wait_closed).
    pub(crate) async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(
            shard = self.shared.index,
            cached = state.cache.len(),
            pending = state.queue.len(),
            "closing shard"
        );
        self.shared.flush_cond.notify_one();
    }

    /// Awaits the flush worker after [`close`](Self::close).
    pub(crate) async fn wait_closed(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(shard = self.shared.index, "flush worker task failed: {err}");
            }
        }
    }
}

impl NodeShared {
    /// Resolves `key` against the cache, fetching from the backing store on a
    /// miss with single-flight protection.
    ///
    /// Returns the re-acquired guard plus `Some(attrs)` / `None` for
    /// present/absent. The mutex is released while the fetch is in flight and
    /// while waiting on another task's fetch.
    async fn get_or_fetch<'a>(
        shared: &'a Arc<NodeShared>,
        mut state: MutexGuard<'a, NodeState>,
        key: &Key,
    ) -> Result<(MutexGuard<'a, NodeState>, Option<Arc<Item>>), StoreError> {
        loop {
            match state.cache.get(key).cloned() {
                Some(CacheEntry::Exist(attrs)) => return Ok((state, Some(attrs))),
                Some(CacheEntry::NotExist) => return Ok((state, None)),
                Some(CacheEntry::Busy) => {
                    let Some(cond) = state.fetch_waits.join(key) else {
                        debug!(
                            shard = shared.index,
                            waiting_keys = state.fetch_waits.len(),
                            "fetch wait set at capacity"
                        );
                        return Err(StoreError::TooManyRequests);
                    };
                    state = cond.wait(state, &shared.state).await;
                    state.fetch_waits.leave(key);
                }
                None => {
                    state.cache.insert(key.clone(), CacheEntry::Busy);
                    drop(state);
                    // The fetch runs in its own task so it settles the Busy
                    // sentinel and signals waiters even if this caller is
                    // dropped mid-await.
                    let fetch = tokio::spawn(NodeShared::fetch_and_store(
                        Arc::clone(shared),
                        key.clone(),
                    ));
                    match fetch.await {
                        Ok(outcome) => outcome?,
                        Err(err) => {
                            return Err(StoreError::BackingStore(anyhow::anyhow!(
                                "fetch task failed: {err}"
                            )))
                        }
                    }
                    state = shared.state.lock().await;
                }
            }
        }
    }

    /// Fetches one key and installs the result, signalling waiters exactly
    /// once on every path.
    async fn fetch_and_store(shared: Arc<NodeShared>, key: Key) -> Result<(), StoreError> {
        let fetched = shared.remote_get(&key).await;
        let mut state = shared.state.lock().await;
        let outcome = match fetched {
            Ok(entry) => {
                // A write that landed while the mutex was released wins over
                // the fetched snapshot.
                let unresolved = state
                    .cache
                    .get(&key)
                    .map_or(true, |current| current.is_busy());
                if unresolved {
                    state.cache.insert(key.clone(), entry);
                }
                Ok(())
            }
            Err(err) => {
                state.cache.remove(&key);
                Err(err)
            }
        };
        state.fetch_waits.signal(&key);
        outcome
    }

    async fn remote_get(&self, key: &Key) -> Result<CacheEntry, StoreError> {
        let key_item = encode_key(key)?;
        match timeout(self.remote_timeout, self.client.get(&self.table, &key_item)).await {
            Ok(Ok(Some(attrs))) => Ok(CacheEntry::Exist(Arc::new(attrs))),
            Ok(Ok(None)) => Ok(CacheEntry::NotExist),
            Ok(Err(err)) => Err(StoreError::BackingStore(err)),
            Err(_) => Err(StoreError::BackingStore(anyhow::anyhow!(
                "get timed out after {:?}",
                self.remote_timeout
            ))),
        }
    }

    /// Resolves many keys: cache hits first, then one batched fetch pass for
    /// the rest.
    ///
    /// The batched path takes no per-key sentinels, so overlapping multi-gets
    /// may fetch the same key redundantly; single-key reads are unaffected.
    async fn get_or_fetch_multi<'a>(
        &'a self,
        mut state: MutexGuard<'a, NodeState>,
        keys: &[Key],
    ) -> Result<HashMap<Key, Option<Arc<Item>>>, StoreError> {
        let mut resolved = HashMap::with_capacity(keys.len());
        let mut missing: Vec<Key> = Vec::new();
        for key in keys {
            match state.cache.get(key).cloned() {
                Some(CacheEntry::Exist(attrs)) => {
                    resolved.insert(key.clone(), Some(attrs));
                }
                Some(CacheEntry::NotExist) => {
                    resolved.insert(key.clone(), None);
                }
                Some(CacheEntry::Busy) | None => missing.push(key.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(resolved);
        }

        drop(state);
        let fetched = self.fetch_multi(&missing).await;
        state = self.state.lock().await;
        let fetched = fetched?;

        for key in missing {
            match state.cache.get(&key).cloned() {
                // Still unresolved: install what the batch returned.
                None | Some(CacheEntry::Busy) => match fetched.get(&key) {
                    Some(attrs) => {
                        state
                            .cache
                            .insert(key.clone(), CacheEntry::Exist(Arc::clone(attrs)));
                        resolved.insert(key, Some(Arc::clone(attrs)));
                    }
                    None => {
                        state.cache.insert(key.clone(), CacheEntry::NotExist);
                        resolved.insert(key, None);
                    }
                },
                // Someone else resolved or overwrote it meanwhile; theirs is
                // fresher than our batch snapshot.
                Some(CacheEntry::Exist(attrs)) => {
                    resolved.insert(key, Some(attrs));
                }
                Some(CacheEntry::NotExist) => {
                    resolved.insert(key, None);
                }
            }
        }
        Ok(resolved)
    }

    /// Issues batched reads for `keys`, resubmitting unprocessed keys until
    /// the backing store has answered for all of them.
    async fn fetch_multi(&self, keys: &[Key]) -> Result<HashMap<Key, Arc<Item>>, StoreError> {
        let mut by_canonical: HashMap<String, Key> =
            keys.iter().map(|k| (k.canonical(), k.clone())).collect();
        let mut pending: Vec<Item> = Vec::with_capacity(keys.len());
        for key in keys {
            pending.push(encode_key(key)?);
        }

        let mut found = HashMap::new();
        while !pending.is_empty() {
            let take = pending.len().min(self.batch_get_size);
            let batch: Vec<Item> = pending.drain(..take).collect();
            let response = match timeout(
                self.remote_timeout,
                self.client.batch_get(&self.table, &batch),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => return Err(StoreError::BackingStore(err)),
                Err(_) => {
                    return Err(StoreError::BackingStore(anyhow::anyhow!(
                        "batch get timed out after {:?}",
                        self.remote_timeout
                    )))
                }
            };
            for item in response.items {
                let canonical = match item.get(KEY_ATTRIBUTE).and_then(AttrValue::as_str) {
                    Some(canonical) => canonical.to_string(),
                    None => continue,
                };
                if let Some(key) = by_canonical.remove(&canonical) {
                    found.insert(key, Arc::new(item));
                }
            }
            pending.extend(response.unprocessed);
        }
        Ok(found)
    }

    /// Records a mutation: pushes it onto the queue (waiting for space if
    /// full), wakes the flush worker at the threshold, and overwrites the
    /// cache to reflect the new state.
    async fn enqueue<'a>(
        &'a self,
        mut state: MutexGuard<'a, NodeState>,
        key: &Key,
        mutation: Mutation,
    ) {
        while state.queue.is_full() {
            state = self.not_full.wait(state, &self.state).await;
        }
        let entry = match mutation.op {
            MutationOp::Delete => CacheEntry::NotExist,
            _ => CacheEntry::Exist(Arc::clone(&mutation.attrs)),
        };
        state.queue.push(mutation);
        if state.queue.len() >= self.flush_threshold {
            self.flush_cond.notify_one();
        }
        state.cache.insert(key.clone(), entry);
    }

    /// Applies one mutation to the backing store.
    async fn execute(&self, mutation: &Mutation) -> Result<(), StoreError> {
        let result = match mutation.op {
            MutationOp::Insert | MutationOp::Upsert | MutationOp::Update => {
                timeout(
                    self.remote_timeout,
                    self.client.put(&self.table, &mutation.attrs),
                )
                .await
            }
            MutationOp::Delete => {
                timeout(
                    self.remote_timeout,
                    self.client.delete(&self.table, &mutation.attrs),
                )
                .await
            }
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(StoreError::BackingStore(err)),
            Err(_) => Err(StoreError::BackingStore(anyhow::anyhow!(
                "write timed out after {:?}",
                self.remote_timeout
            ))),
        }
    }

    /// Closes the shard after a write failure, drains what is left, and
    /// reports the loss.
    async fn abort_after_failure(&self, err: StoreError, mut abandoned: Vec<Mutation>) {
        let mut state = self.state.lock().await;
        state.closed = true;
        while let Some(mutation) = state.queue.pop() {
            abandoned.push(mutation);
        }
        drop(state);
        // Producers stuck on a full queue must observe the drain.
        self.not_full.notify_all();

        error!(
            shard = self.index,
            abandoned = abandoned.len(),
            "flush failed, shard closed: {err}"
        );
        if let Some(tx) = &self.failure_tx {
            let _ = tx.send(FlushFailure {
                error: err,
                abandoned,
            });
        }
    }
}

/// The per-shard flush loop: waits for the threshold (or close), drains the
/// queue, and applies mutations in enqueue order.
async fn flush_worker(shared: Arc<NodeShared>) {
    debug!(shard = shared.index, "flush worker started");
    loop {
        let mut state = shared.state.lock().await;
        while !state.closed && state.queue.len() < shared.flush_threshold {
            state = shared.flush_cond.wait(state, &shared.state).await;
        }
        let closed = state.closed;
        let mut batch = Vec::with_capacity(state.queue.len());
        while let Some(mutation) = state.queue.pop() {
            batch.push(mutation);
            shared.not_full.notify_one();
        }
        drop(state);

        if !batch.is_empty() {
            debug!(shard = shared.index, count = batch.len(), "flushing");
        }
        let mut failed: Option<StoreError> = None;
        let mut completed = 0;
        for mutation in &batch {
            if let Err(err) = shared.execute(mutation).await {
                failed = Some(err);
                break;
            }
            completed += 1;
        }
        if let Some(err) = failed {
            let abandoned = batch.split_off(completed);
            shared.abort_after_failure(err, abandoned).await;
            return;
        }
        if closed {
            debug!(shard = shared.index, "flush worker stopped");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryTableClient;
    use serde::Deserialize;
    use swiftstore_core::{encode_item, from_item};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    fn test_config() -> StoreConfig {
        StoreConfig {
            num_shards: 1,
            queue_capacity: 64,
            flush_threshold: 8,
            cache_capacity: 64,
            cond_set_capacity: 8,
            remote_timeout: Duration::from_secs(5),
            batch_get_size: 100,
        }
    }

    fn node_with(client: &Arc<MemoryTableClient>, config: &StoreConfig) -> Node {
        Node::new(
            Arc::clone(client) as Arc<dyn TableClient>,
            "t".to_string(),
            config,
            0,
            None,
        )
    }

    fn key(tag: &str) -> Key {
        Key::root("itm", tag)
    }

    fn item(key: &Key, name: &str) -> Item {
        encode_item(key, &serde_json::json!({ "name": name })).unwrap()
    }

    fn name_of(attrs: &Item) -> String {
        from_item::<Named>(attrs).unwrap().name
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn insert_then_get_serves_from_cache() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        node.insert(&k, item(&k, "x")).await.unwrap();
        // The existence probe on the cold key was the only remote read.
        assert_eq!(client.get_count(), 1);

        let attrs = node.get(&k).await.unwrap();
        assert_eq!(name_of(&attrs), "x");
        assert_eq!(client.get_count(), 1, "get must not reach the backing store");
    }

    #[tokio::test]
    async fn insert_on_existing_key_fails_without_remote_call() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        node.insert(&k, item(&k, "v1")).await.unwrap();
        let err = node.insert(&k, item(&k, "v2")).await.unwrap_err();
        assert!(matches!(err, StoreError::ItemExisted { .. }));
        assert_eq!(client.get_count(), 1, "second insert resolved from cache");

        // The first value is what later reads observe.
        let attrs = node.get(&k).await.unwrap();
        assert_eq!(name_of(&attrs), "v1");
    }

    #[tokio::test]
    async fn upsert_skips_the_existence_probe() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        node.upsert(&k, item(&k, "v1")).await.unwrap();
        node.upsert(&k, item(&k, "v2")).await.unwrap();
        assert_eq!(client.get_count(), 0);

        let attrs = node.get(&k).await.unwrap();
        assert_eq!(name_of(&attrs), "v2");
    }

    #[tokio::test]
    async fn update_requires_existence() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        let err = node.update(&k, item(&k, "v1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ItemNotExisted { .. }));

        node.upsert(&k, item(&k, "v1")).await.unwrap();
        node.update(&k, item(&k, "v2")).await.unwrap();
        let attrs = node.get(&k).await.unwrap();
        assert_eq!(name_of(&attrs), "v2");
    }

    #[tokio::test]
    async fn delete_then_get_reports_not_existed() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        node.upsert(&k, item(&k, "x")).await.unwrap();
        node.delete(&k, encode_key(&k).unwrap()).await.unwrap();

        let err = node.get(&k).await.unwrap_err();
        assert!(matches!(err, StoreError::ItemNotExisted { .. }));
        assert_eq!(client.get_count(), 0, "the tombstone is cached");
    }

    #[tokio::test]
    async fn reaching_the_threshold_flushes_in_order() {
        let client = Arc::new(MemoryTableClient::new());
        let config = StoreConfig {
            flush_threshold: 2,
            ..test_config()
        };
        let node = node_with(&client, &config);
        let k = key("A");

        node.upsert(&k, item(&k, "v1")).await.unwrap();
        node.upsert(&k, item(&k, "v2")).await.unwrap();

        wait_until("both puts to land", || client.put_count() == 2).await;
        // Same-key mutations applied in enqueue order: v2 is the survivor.
        let row = client.row(&k.canonical()).unwrap();
        assert_eq!(name_of(&row), "v2");
    }

    #[tokio::test]
    async fn close_drains_below_threshold_mutations() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let keys: Vec<Key> = (0..3).map(|i| key(&format!("K{i}"))).collect();

        for k in &keys {
            node.upsert(k, item(k, "x")).await.unwrap();
        }
        assert_eq!(client.put_count(), 0, "below threshold, nothing flushed yet");

        node.close().await;
        node.wait_closed().await;

        assert_eq!(client.put_count(), 3);
        for k in &keys {
            assert!(client.row(&k.canonical()).is_some());
        }
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let client = Arc::new(MemoryTableClient::new());
        let node = node_with(&client, &test_config());
        let k = key("A");

        node.close().await;
        node.wait_closed().await;

        assert!(matches!(
            node.insert(&k, item(&k, "x")).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            node.upsert(&k, item(&k, "x")).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            node.update(&k, item(&k, "x")).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            node.delete(&k, encode_key(&k).unwrap()).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(node.get(&k).await, Err(StoreError::Closed)));
        assert!(matches!(
            node.get_multi(&[k.clone()]).await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_share_one_fetch() {
        let client = Arc::new(MemoryTableClient::new());
        let k = key("A");
        client.put("t", &item(&k, "x")).await.unwrap();
        client.set_read_delay_ms(50);

        let node = node_with(&client, &test_config());
        let (a, b) = tokio::join!(node.get(&k), node.get(&k));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(name_of(&a), "x");
        assert_eq!(name_of(&b), "x");
        assert_eq!(client.get_count(), 1, "single-flight: one fetch for both");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cond_set_capacity_rejects_extra_keys() {
        let client = Arc::new(MemoryTableClient::new());
        let k1 = key("A");
        let k2 = key("B");
        client.put("t", &item(&k1, "x")).await.unwrap();
        client.put("t", &item(&k2, "y")).await.unwrap();
        client.set_read_delay_ms(200);

        let config = StoreConfig {
            cond_set_capacity: 1,
            ..test_config()
        };
        let node = Arc::new(node_with(&client, &config));

        // Two fetches in flight, one waiter occupying the only slot.
        let g1a = tokio::spawn({
            let node = Arc::clone(&node);
            let k1 = k1.clone();
            async move { node.get(&k1).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let g1b = tokio::spawn({
            let node = Arc::clone(&node);
            let k1 = k1.clone();
            async move { node.get(&k1).await }
        });
        let g2a = tokio::spawn({
            let node = Arc::clone(&node);
            let k2 = k2.clone();
            async move { node.get(&k2).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A waiter for a second distinct key cannot join.
        let err = node.get(&k2).await.unwrap_err();
        assert!(matches!(err, StoreError::TooManyRequests));

        g1a.await.unwrap().unwrap();
        g1b.await.unwrap().unwrap();
        g2a.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_queue_blocks_until_the_worker_pops() {
        let client = Arc::new(MemoryTableClient::new());
        client.set_write_delay_ms(50);
        let config = StoreConfig {
            queue_capacity: 1,
            flush_threshold: 1,
            ..test_config()
        };
        let node = node_with(&client, &config);

        for i in 0..3 {
            let k = key(&format!("K{i}"));
            node.upsert(&k, item(&k, "x")).await.unwrap();
        }

        wait_until("all puts to land", || client.put_count() == 3).await;
        assert_eq!(client.len(), 3);
    }

    #[tokio::test]
    async fn flush_failure_reports_abandoned_mutations_and_closes() {
        let client = Arc::new(MemoryTableClient::new());
        client.fail_writes(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = StoreConfig {
            flush_threshold: 2,
            ..test_config()
        };
        let node = Node::new(
            Arc::clone(&client) as Arc<dyn TableClient>,
            "t".to_string(),
            &config,
            0,
            Some(tx),
        );

        let k1 = key("A");
        let k2 = key("B");
        node.upsert(&k1, item(&k1, "x")).await.unwrap();
        node.upsert(&k2, item(&k2, "y")).await.unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("failure should be reported")
            .expect("sender still alive");
        assert_eq!(failure.error.code(), "BackingStoreError");
        assert_eq!(failure.abandoned.len(), 2, "failed plus remaining");
        assert_eq!(failure.abandoned[0].op(), MutationOp::Upsert);

        node.wait_closed().await;
        let err = node.upsert(&k1, item(&k1, "z")).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn multi_get_mixes_cache_and_batched_fetch() {
        let client = Arc::new(MemoryTableClient::new());
        let cached = key("A");
        let remote = key("B");
        let absent = key("C");
        client.put("t", &item(&remote, "remote")).await.unwrap();

        let node = node_with(&client, &test_config());
        node.upsert(&cached, item(&cached, "local")).await.unwrap();

        let out = node
            .get_multi(&[cached.clone(), remote.clone(), absent.clone()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(name_of(&out[&cached]), "local");
        assert_eq!(name_of(&out[&remote]), "remote");
        assert!(!out.contains_key(&absent));
        assert_eq!(client.batch_get_count(), 1);

        // Everything, including the miss, is now cached.
        let again = node
            .get_multi(&[cached, remote, absent])
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(client.batch_get_count(), 1);
    }

    #[tokio::test]
    async fn multi_get_resubmits_unprocessed_keys() {
        let client = Arc::new(MemoryTableClient::new());
        let k1 = key("A");
        let k2 = key("B");
        client.put("t", &item(&k1, "x")).await.unwrap();
        client.put("t", &item(&k2, "y")).await.unwrap();
        client.defer_next_batch(1);

        let node = node_with(&client, &test_config());
        let out = node.get_multi(&[k1.clone(), k2.clone()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(client.batch_get_count(), 2, "deferred key went back out");
    }

    #[tokio::test]
    async fn multi_get_chunks_to_the_batch_size() {
        let client = Arc::new(MemoryTableClient::new());
        let config = StoreConfig {
            batch_get_size: 2,
            ..test_config()
        };
        let node = node_with(&client, &config);

        let keys: Vec<Key> = (0..5).map(|i| key(&format!("K{i}"))).collect();
        let out = node.get_multi(&keys).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(client.batch_get_count(), 3, "5 keys in chunks of 2");
    }
}
