//! Explicit type registry: which kinds exist and how they are scoped.
//!
//! Built once at start-up and handed to the components that resolve types.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: FxHashMap<(String, String), Scope>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the core kinds the engine itself writes.
    pub fn with_core_types() -> Self {
        Self::new().register("v1", "Secret", Scope::Namespaced).register("v1", "ConfigMap", Scope::Namespaced)
    }

    pub fn register(mut self, api_version: &str, kind: &str, scope: Scope) -> Self {
        self.types.insert((api_version.to_string(), kind.to_string()), scope);
        self
    }

    pub fn scope(&self, api_version: &str, kind: &str) -> Option<Scope> {
        self.types.get(&(api_version.to_string(), kind.to_string())).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_by_api_version_and_kind() {
        let r = TypeRegistry::with_core_types().register("example.org/v1", "XBucket", Scope::Cluster);
        assert_eq!(r.scope("v1", "Secret"), Some(Scope::Namespaced));
        assert_eq!(r.scope("example.org/v1", "XBucket"), Some(Scope::Cluster));
        assert_eq!(r.scope("example.org/v2", "XBucket"), None);
        assert_eq!(r.len(), 3);
    }
}
