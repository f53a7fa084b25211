use crate::comparator::template::Comparator;
use crate::comparator::types::{ComparatorInput, ComparatorResult};
use crate::error::{CoreError, CoreResult};
use crate::strategies::openapi_docs::OpenApiDocsComparator;
use crate::strategies::terraform_runbook::TerraformRunbookComparator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Lookup from comparator type to the strategy that owns it.
///
/// Built once at startup and passed to whatever runs comparators.
#[derive(Default, Clone)]
pub struct ComparatorRegistry {
    comparators: BTreeMap<String, Arc<dyn Comparator>>,
}

impl ComparatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled strategy registered.
    pub fn with_builtin() -> CoreResult<Self> {
        let mut reg = Self::new();
        reg.register(Arc::new(OpenApiDocsComparator::new()?))?;
        reg.register(Arc::new(TerraformRunbookComparator::new()?))?;
        Ok(reg)
    }

    pub fn register(&mut self, comparator: Arc<dyn Comparator>) -> CoreResult<()> {
        let key = comparator.comparator_type().to_string();
        if self.comparators.contains_key(&key) {
            return Err(CoreError::DuplicateComparator(key));
        }
        debug!(comparator = %key, "comparator registered");
        self.comparators.insert(key, comparator);
        Ok(())
    }

    pub fn get(&self, comparator_type: &str) -> Option<Arc<dyn Comparator>> {
        self.comparators.get(comparator_type).cloned()
    }

    pub fn comparator_types(&self) -> Vec<String> {
        self.comparators.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.comparators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparators.is_empty()
    }

    /// Resolve the invariant's comparator type and run it.
    pub fn compare(&self, input: &ComparatorInput) -> CoreResult<ComparatorResult> {
        let comparator = self
            .get(&input.invariant.comparator_type)
            .ok_or_else(|| CoreError::UnknownComparator(input.invariant.comparator_type.clone()))?;
        comparator.compare(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::openapi_docs::OPENAPI_DOCS_COMPARATOR;
    use crate::strategies::terraform_runbook::TERRAFORM_RUNBOOK_COMPARATOR;

    #[test]
    fn builtin_registers_both_strategies() {
        let reg = ComparatorRegistry::with_builtin().unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.get(OPENAPI_DOCS_COMPARATOR).is_some());
        assert!(reg.get(TERRAFORM_RUNBOOK_COMPARATOR).is_some());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = ComparatorRegistry::with_builtin().unwrap();
        let err = reg
            .register(Arc::new(TerraformRunbookComparator::new().unwrap()))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateComparator(_)));
    }
}
