//! Backing-store client abstraction.
//!
//! [`TableClient`] is the narrow surface the store needs from the remote
//! key-value database: point reads, batched reads, writes, and deletes
//! against a named table. Implementations must be thread-safe; a single
//! client is shared by every shard. Errors surface as [`anyhow::Error`] and
//! are wrapped into [`StoreError::BackingStore`](crate::error::StoreError)
//! by the store.

use async_trait::async_trait;

use swiftstore_core::Item;

/// Result of a batched read.
#[derive(Debug, Default)]
pub struct BatchGetResponse {
    /// Items found, each carrying its `_key` attribute.
    pub items: Vec<Item>,
    /// Keys the backing store declined to process in this round. The caller
    /// resubmits them.
    pub unprocessed: Vec<Item>,
}

/// Narrow client interface to the remote table.
///
/// Used as `Arc<dyn TableClient>`. Every call runs under the store's
/// configured per-call deadline.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Point read. `key` is a `_key`-only item. Returns `None` when the item
    /// is absent.
    async fn get(&self, table: &str, key: &Item) -> anyhow::Result<Option<Item>>;

    /// Batched point reads. The store sends at most its configured batch
    /// size per call.
    async fn batch_get(&self, table: &str, keys: &[Item]) -> anyhow::Result<BatchGetResponse>;

    /// Inserts or replaces a full item.
    async fn put(&self, table: &str, item: &Item) -> anyhow::Result<()>;

    /// Deletes by `_key`-only item. Deleting an absent key is not an error.
    async fn delete(&self, table: &str, key: &Item) -> anyhow::Result<()>;
}
