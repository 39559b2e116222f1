//! Attribute values — the typed payload model of the backing table.
//!
//! Every stored item is a map of named attributes. The store itself only
//! needs round-trip fidelity; the meaning of the attributes belongs to the
//! caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reserved attribute carrying the canonical key string in every item.
pub const KEY_ATTRIBUTE: &str = "_key";

/// One item: named attributes as stored in the backing table.
///
/// Uses `BTreeMap` for deterministic attribute order.
pub type Item = BTreeMap<String, AttrValue>;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Absent/null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<AttrValue>),
    /// Nested attribute map.
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// The string payload, when this value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}
