//! Routing-hash contract for shard selection.
//!
//! Every key routes to a shard by `xxhash64(canonical) % shard_count`. The
//! function is the stable contract between the dispatcher and anything that
//! needs to predict placement; changing it reshuffles every key.

use std::hash::Hasher;

use twox_hash::XxHash64;

/// 64-bit xxHash (seed 0) of a canonical key string.
#[must_use]
pub fn route_hash(canonical: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(canonical.as_bytes());
    hasher.finish()
}
