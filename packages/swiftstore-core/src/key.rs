//! Structured keys with a stable canonical string form.
//!
//! A [`Key`] identifies one item in the backing table. Its canonical form is
//! `parent '.' kind identifier`, or `kind identifier` when the parent is
//! empty; the parent may itself be a dotted path. Parsing the canonical form
//! requires a [`KindRegistry`](crate::registry::KindRegistry) to decide where
//! the kind tag ends and the identifier begins.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::RngCore;

use crate::registry::KindRegistry;

/// Separator between the parent path and the final `kind identifier` segment.
pub const KEY_DELIMITER: char = '.';

/// Number of random bytes behind a generated identifier.
const RAND_IDENTIFIER_BYTES: usize = 9;

/// A structured item key.
///
/// Keys compare and hash by their fields, which for complete keys is
/// equivalent to comparing canonical strings. A key with an empty `kind` is
/// *incomplete*: it has no canonical form and cannot be stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    /// Hierarchical prefix, possibly empty, possibly itself a dotted path.
    pub parent: String,
    /// Registered kind tag. Empty marks the key incomplete.
    pub kind: String,
    /// Opaque token distinguishing items of the same kind.
    pub identifier: String,
}

impl Key {
    /// Creates a key from its three parts.
    #[must_use]
    pub fn new(
        parent: impl Into<String>,
        kind: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Creates a key with no parent path.
    #[must_use]
    pub fn root(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::new("", kind, identifier)
    }

    /// Whether this key lacks a kind and therefore has no canonical form.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.kind.is_empty()
    }

    /// Canonical string form: `parent '.' kind identifier`, or
    /// `kind identifier` without a parent. Empty for incomplete keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        if self.is_incomplete() {
            return String::new();
        }
        if self.parent.is_empty() {
            format!("{}{}", self.kind, self.identifier)
        } else {
            format!("{}{}{}{}", self.parent, KEY_DELIMITER, self.kind, self.identifier)
        }
    }

    /// Parses a canonical string.
    ///
    /// The segment after the last delimiter is split by scanning its prefixes
    /// from shortest to longest and taking the first one registered in
    /// `kinds`. A string whose final segment starts with no registered kind
    /// yields an incomplete key.
    #[must_use]
    pub fn parse(s: &str, kinds: &KindRegistry) -> Self {
        let (parent, rear) = divide(s);
        let mut end = 0;
        for ch in rear.chars() {
            end += ch.len_utf8();
            if kinds.is_registered(&rear[..end]) {
                return Self {
                    parent: parent.to_string(),
                    kind: rear[..end].to_string(),
                    identifier: rear[end..].to_string(),
                };
            }
        }
        Self::default()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Splits `s` at its last delimiter into `(parent, rest)`.
fn divide(s: &str) -> (&str, &str) {
    match s.rfind(KEY_DELIMITER) {
        Some(pos) => (&s[..pos], &s[pos + KEY_DELIMITER.len_utf8()..]),
        None => ("", s),
    }
}

/// Implemented by types that know the storage key they live under.
///
/// Store operations accept any provider, so callers can pass either a [`Key`]
/// directly or a domain type that derives its own key.
pub trait KeyProvider {
    /// The key this value is stored at.
    fn storage_key(&self) -> Key;
}

impl KeyProvider for Key {
    fn storage_key(&self) -> Key {
        self.clone()
    }
}

/// Generates a random URL-safe identifier suitable for [`Key::identifier`].
#[must_use]
pub fn rand_identifier() -> String {
    let mut buf = [0u8; RAND_IDENTIFIER_BYTES];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE.encode(buf)
}
