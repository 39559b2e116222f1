//! `swiftstore` core — the data model shared by the store façade and its
//! callers: structured keys, the kind registry, attribute values, the serde
//! codec bridging user types to attribute maps, and the routing-hash
//! contract.

pub mod attrs;
pub mod codec;
pub mod hash;
pub mod key;
pub mod registry;

pub use attrs::{AttrValue, Item, KEY_ATTRIBUTE};
pub use codec::{decode_key, encode_item, encode_key, from_item, to_item, CodecError};
pub use hash::route_hash;
pub use key::{rand_identifier, Key, KeyProvider};
pub use registry::KindRegistry;
