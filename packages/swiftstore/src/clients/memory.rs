//! In-memory [`TableClient`] for tests, examples, and ephemeral data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use dashmap::DashMap;

use swiftstore_core::{AttrValue, Item, KEY_ATTRIBUTE};

use crate::client::{BatchGetResponse, TableClient};

/// In-memory table client backed by a [`DashMap`] keyed by the canonical
/// `_key` string.
///
/// Holds a single logical table; the table name passed to each call is
/// accepted for interface parity and otherwise ignored. Per-operation call
/// counts let tests assert how often the store actually reached the backing
/// table, and failure/deferral injection exercises the flush-failure and
/// unprocessed-keys paths.
#[derive(Debug, Default)]
pub struct MemoryTableClient {
    rows: DashMap<String, Item>,
    gets: AtomicU64,
    batch_gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    fail_writes: AtomicBool,
    defer_keys: AtomicU64,
    read_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
}

impl MemoryTableClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A stored row by canonical key string.
    #[must_use]
    pub fn row(&self, canonical: &str) -> Option<Item> {
        self.rows.get(canonical).map(|r| r.clone())
    }

    /// Point reads served so far.
    #[must_use]
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Batched read requests served so far.
    #[must_use]
    pub fn batch_get_count(&self) -> u64 {
        self.batch_gets.load(Ordering::Relaxed)
    }

    /// Puts served so far.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Deletes served so far.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Makes every subsequent put/delete fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Makes the next batched read return up to `count` of its keys as
    /// unprocessed instead of resolving them.
    pub fn defer_next_batch(&self, count: usize) {
        self.defer_keys.store(count as u64, Ordering::Relaxed);
    }

    /// Adds an artificial delay to every read, for overlap tests.
    pub fn set_read_delay_ms(&self, millis: u64) {
        self.read_delay_ms.store(millis, Ordering::Relaxed);
    }

    /// Adds an artificial delay to every write, for backpressure tests.
    pub fn set_write_delay_ms(&self, millis: u64) {
        self.write_delay_ms.store(millis, Ordering::Relaxed);
    }

    async fn delay(&self, millis: &AtomicU64) {
        let millis = millis.load(Ordering::Relaxed);
        if millis > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        }
    }

    fn canonical_of(key: &Item) -> anyhow::Result<String> {
        key.get(KEY_ATTRIBUTE)
            .and_then(AttrValue::as_str)
            .map(str::to_string)
            .context("key item is missing the _key attribute")
    }
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn get(&self, _table: &str, key: &Item) -> anyhow::Result<Option<Item>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.delay(&self.read_delay_ms).await;
        let canonical = Self::canonical_of(key)?;
        Ok(self.rows.get(&canonical).map(|r| r.clone()))
    }

    async fn batch_get(&self, _table: &str, keys: &[Item]) -> anyhow::Result<BatchGetResponse> {
        self.batch_gets.fetch_add(1, Ordering::Relaxed);
        self.delay(&self.read_delay_ms).await;

        let deferred = self.defer_keys.swap(0, Ordering::Relaxed) as usize;
        let deferred = deferred.min(keys.len());
        let (held_back, served) = keys.split_at(deferred);

        let mut response = BatchGetResponse {
            unprocessed: held_back.to_vec(),
            ..BatchGetResponse::default()
        };
        for key in served {
            let canonical = Self::canonical_of(key)?;
            if let Some(row) = self.rows.get(&canonical) {
                response.items.push(row.clone());
            }
        }
        Ok(response)
    }

    async fn put(&self, _table: &str, item: &Item) -> anyhow::Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.delay(&self.write_delay_ms).await;
        if self.fail_writes.load(Ordering::Relaxed) {
            bail!("injected write failure");
        }
        let canonical = Self::canonical_of(item)?;
        self.rows.insert(canonical, item.clone());
        Ok(())
    }

    async fn delete(&self, _table: &str, key: &Item) -> anyhow::Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.delay(&self.write_delay_ms).await;
        if self.fail_writes.load(Ordering::Relaxed) {
            bail!("injected write failure");
        }
        let canonical = Self::canonical_of(key)?;
        self.rows.remove(&canonical);
        Ok(())
    }
}
