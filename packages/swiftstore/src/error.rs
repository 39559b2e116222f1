//! Error taxonomy of the store façade.

use swiftstore_core::codec::CodecError;
use swiftstore_core::Key;

/// Errors returned by public store operations.
///
/// Every kind carries a stable [`code()`](StoreError::code) string; kinds
/// about a specific item also expose the [`key()`](StoreError::key).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A value or key could not be encoded into attributes.
    #[error("cannot serialize: {0}")]
    Serialize(#[from] CodecError),
    /// `insert` found an item already stored under the key.
    #[error("item with key {key} already exists")]
    ItemExisted {
        /// The key the insert collided on.
        key: Key,
    },
    /// `update` or `get` found no item under the key.
    #[error("item with key {key} does not exist")]
    ItemNotExisted {
        /// The key with no stored item.
        key: Key,
    },
    /// Too many distinct keys have fetches in flight on one shard.
    #[error("too many distinct keys with concurrent fetches")]
    TooManyRequests,
    /// The backing store reported a failure.
    #[error("backing store error: {0}")]
    BackingStore(#[from] anyhow::Error),
    /// The operation was submitted after the store was closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Serialize(_) => "SerializeException",
            Self::ItemExisted { .. } => "ItemExisted",
            Self::ItemNotExisted { .. } => "ItemNotExisted",
            Self::TooManyRequests => "TooManyRequests",
            Self::BackingStore(_) => "BackingStoreError",
            Self::Closed => "Closed",
        }
    }

    /// The key the error pertains to, when the kind carries one.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::ItemExisted { key } | Self::ItemNotExisted { key } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let key = Key::root("itm", "A1");
        assert_eq!(
            StoreError::ItemExisted { key: key.clone() }.code(),
            "ItemExisted"
        );
        assert_eq!(
            StoreError::ItemNotExisted { key }.code(),
            "ItemNotExisted"
        );
        assert_eq!(StoreError::TooManyRequests.code(), "TooManyRequests");
        assert_eq!(StoreError::Closed.code(), "Closed");
        assert_eq!(
            StoreError::BackingStore(anyhow::anyhow!("boom")).code(),
            "BackingStoreError"
        );
        assert_eq!(
            StoreError::Serialize(CodecError::IncompleteKey).code(),
            "SerializeException"
        );
    }

    #[test]
    fn key_accessor() {
        let key = Key::root("itm", "A1");
        let err = StoreError::ItemExisted { key: key.clone() };
        assert_eq!(err.key(), Some(&key));
        assert!(StoreError::Closed.key().is_none());
    }

    #[test]
    fn display_names_the_key() {
        let key = Key::new("org7", "itm", "A1");
        let err = StoreError::ItemNotExisted { key };
        assert_eq!(err.to_string(), "item with key org7.itmA1 does not exist");
    }
}
