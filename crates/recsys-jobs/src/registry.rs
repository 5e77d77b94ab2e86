//! Engine factory registry keyed by tool id.

use std::collections::HashMap;
use std::sync::Arc;

use recsys_core::RecommendationEngineFactory;

/// Registry mapping tool ids to engine factories.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    factories: HashMap<String, Arc<dyn RecommendationEngineFactory>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces any existing factory with the same id.
    pub fn register(&mut self, factory: Arc<dyn RecommendationEngineFactory>) {
        self.factories.insert(factory.id().to_string(), factory);
    }

    pub fn with_factory(mut self, factory: Arc<dyn RecommendationEngineFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn RecommendationEngineFactory>> {
        self.factories.get(tool).cloned()
    }

    /// Registered tool ids, sorted.
    pub fn available_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.factories.keys().cloned().collect();
        tools.sort();
        tools
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("tools", &self.available_tools())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsys_store::mock::MockEngineFactory;

    #[test]
    fn test_registry_new_is_empty() {
        let registry = EngineRegistry::new();
        assert!(registry.available_tools().is_empty());
        assert!(registry.get("mock").is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = EngineRegistry::new()
            .with_factory(Arc::new(MockEngineFactory::new("b")))
            .with_factory(Arc::new(MockEngineFactory::new("a")));
        assert_eq!(registry.get("a").unwrap().id(), "a");
        assert_eq!(registry.get("b").unwrap().id(), "b");
        assert_eq!(registry.available_tools(), vec!["a", "b"]);
    }
}
