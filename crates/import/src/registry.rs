//! Strategy registry: import-type key → strategy implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::ImportError;
use crate::strategy::ImportStrategy;

#[derive(Default)]
pub struct ImportRegistry {
    strategies: HashMap<&'static str, Arc<dyn ImportStrategy>>,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in strategies registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::strategies::RawLineItems));
        registry.register(Arc::new(crate::strategies::ComponentBreakdown));
        registry.register(Arc::new(crate::strategies::PriceList));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ImportStrategy>) {
        let name = strategy.name();
        info!(strategy = name, "registered import strategy");
        self.strategies.insert(name, strategy);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ImportStrategy>, ImportError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ImportError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_every_import_type() {
        use siphon_jobs::ImportType;

        let registry = ImportRegistry::with_builtins();
        for import_type in [
            ImportType::RawLineItems,
            ImportType::ComponentBreakdown,
            ImportType::PriceList,
        ] {
            assert!(registry.resolve(import_type.strategy_key()).is_ok());
        }
    }

    #[test]
    fn test_unknown_strategy_is_permanent() {
        let registry = ImportRegistry::with_builtins();
        let err = registry.resolve("payroll").unwrap_err();
        assert!(matches!(err, ImportError::UnknownStrategy(_)));
        assert!(!err.is_transient());
    }
}
