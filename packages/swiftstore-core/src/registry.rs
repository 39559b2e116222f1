//! Registered kind tags used to disambiguate key parsing.

use std::collections::HashSet;

/// The set of kind tags the application uses.
///
/// Parsing a canonical key string needs every legal kind in order to decide
/// where the kind tag ends and the identifier begins (see
/// [`Key::parse`](crate::key::Key::parse)). Build the registry once at
/// startup, register every kind, then share it immutably (typically behind an
/// `Arc`). Registering new kinds after parsing has begun is not supported.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashSet<String>,
}

impl KindRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from an iterator of kind tags.
    #[must_use]
    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Registers a kind tag.
    pub fn register(&mut self, kind: impl Into<String>) {
        self.kinds.insert(kind.into());
    }

    /// Whether `kind` has been registered.
    #[must_use]
    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kinds have been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_query() {
        let mut registry = KindRegistry::new();
        assert!(registry.is_empty());

        registry.register("usr");
        registry.register("itm");

        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered("usr"));
        assert!(registry.is_registered("itm"));
        assert!(!registry.is_registered("ord"));
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let mut registry = KindRegistry::new();
        registry.register("usr");
        registry.register("usr");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn with_kinds_collects() {
        let registry = KindRegistry::with_kinds(["usr", "itm", "ord"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.is_registered("ord"));
    }
}
