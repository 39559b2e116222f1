//! Serde bridge between caller types and attribute maps.
//!
//! The store is agnostic about user value types; all it requires is that a
//! value can be encoded to an [`Item`]. [`to_item`] and [`from_item`] provide
//! that capability for any `Serialize`/`Deserialize` type by bridging through
//! `serde_json::Value`, and [`encode_item`]/[`encode_key`] attach the
//! reserved [`KEY_ATTRIBUTE`] the table stores every key under.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::attrs::{AttrValue, Item, KEY_ATTRIBUTE};
use crate::key::Key;
use crate::registry::KindRegistry;

/// Errors from encoding or decoding items and keys.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("cannot encode value: {0}")]
    Encode(#[source] serde_json::Error),
    /// The item could not be deserialized into the requested type.
    #[error("cannot decode item: {0}")]
    Decode(#[source] serde_json::Error),
    /// Only values serializing to a map can become items.
    #[error("value of type {0} does not serialize to a map")]
    NotAMap(&'static str),
    /// Incomplete keys have no canonical form and cannot be stored.
    #[error("cannot encode an incomplete key")]
    IncompleteKey,
}

/// Encodes any serializable value into an attribute map.
///
/// The value must serialize to a map (a struct with named fields, or a map
/// type); scalars and sequences are rejected.
pub fn to_item<T: Serialize>(value: &T) -> Result<Item, CodecError> {
    let json = serde_json::to_value(value).map_err(CodecError::Encode)?;
    match json {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .map(|(name, value)| (name, json_to_attr(value)))
            .collect()),
        _ => Err(CodecError::NotAMap(std::any::type_name::<T>())),
    }
}

/// Decodes an attribute map into any deserializable value.
///
/// Attributes the target type does not name (including [`KEY_ATTRIBUTE`]) are
/// ignored, per serde's defaults.
pub fn from_item<T: DeserializeOwned>(item: &Item) -> Result<T, CodecError> {
    let json = Value::Object(
        item.iter()
            .map(|(name, value)| (name.clone(), attr_to_json(value)))
            .collect(),
    );
    serde_json::from_value(json).map_err(CodecError::Decode)
}

/// Encodes a value plus its key: the value's attributes with
/// [`KEY_ATTRIBUTE`] set to the key's canonical string.
pub fn encode_item<T: Serialize>(key: &Key, value: &T) -> Result<Item, CodecError> {
    if key.is_incomplete() {
        return Err(CodecError::IncompleteKey);
    }
    let mut item = to_item(value)?;
    item.insert(KEY_ATTRIBUTE.to_string(), AttrValue::String(key.canonical()));
    Ok(item)
}

/// Encodes a key alone: an item holding only [`KEY_ATTRIBUTE`].
pub fn encode_key(key: &Key) -> Result<Item, CodecError> {
    if key.is_incomplete() {
        return Err(CodecError::IncompleteKey);
    }
    let mut item = Item::new();
    item.insert(KEY_ATTRIBUTE.to_string(), AttrValue::String(key.canonical()));
    Ok(item)
}

/// Reads the key out of an item's [`KEY_ATTRIBUTE`].
///
/// Items without the attribute, or with an unregistered kind, yield an
/// incomplete key.
#[must_use]
pub fn decode_key(item: &Item, kinds: &KindRegistry) -> Key {
    match item.get(KEY_ATTRIBUTE).and_then(AttrValue::as_str) {
        Some(canonical) => Key::parse(canonical, kinds),
        None => Key::default(),
    }
}

fn json_to_attr(value: Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttrValue::Int(i),
            // u64 beyond i64 range, or a true float.
            None => AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AttrValue::String(s),
        Value::Array(values) => AttrValue::List(values.into_iter().map(json_to_attr).collect()),
        Value::Object(fields) => AttrValue::Map(
            fields
                .into_iter()
                .map(|(name, value)| (name, json_to_attr(value)))
                .collect(),
        ),
    }
}

fn attr_to_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Int(i) => Value::from(*i),
        // Non-finite floats have no JSON form.
        AttrValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        AttrValue::String(s) => Value::String(s.clone()),
        AttrValue::Bytes(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        AttrValue::List(values) => Value::Array(values.iter().map(attr_to_json).collect()),
        AttrValue::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), attr_to_json(value)))
                .collect(),
        ),
    }
}
