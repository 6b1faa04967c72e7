//! Hooks run when strategies are added, and locators consulted during
//! resolution.

use super::context::InjectionContext;
use super::key::CapabilityKey;
use super::resolver::ParameterOverride;
use super::scope::Scope;
use super::strategy::ExportStrategy;
use super::Instance;
use crate::errors::LocateError;

/// Observes (and may adjust) every strategy added to a scope or its descendants.
pub trait StrategyInspector: Send + Sync {
    fn inspect(&self, scope: &Scope, strategy: &ExportStrategy);
}

impl<F> StrategyInspector for F
where
    F: Fn(&Scope, &ExportStrategy) + Send + Sync,
{
    fn inspect(&self, scope: &Scope, strategy: &ExportStrategy) {
        self(scope, strategy)
    }
}

/// Contributes parameter overrides to strategies as they are added.
pub trait InjectionValueProviderInspector: Send + Sync {
    fn provide(&self, scope: &Scope, strategy: &ExportStrategy) -> Vec<ParameterOverride>;
}

impl<F> InjectionValueProviderInspector for F
where
    F: Fn(&Scope, &ExportStrategy) -> Vec<ParameterOverride> + Send + Sync,
{
    fn provide(&self, scope: &Scope, strategy: &ExportStrategy) -> Vec<ParameterOverride> {
        self(scope, strategy)
    }
}

/// A source of values outside the scope's own strategy collections.
pub trait SecondaryExportLocator: Send + Sync {
    fn can_locate(&self, scope: &Scope, key: &CapabilityKey) -> bool;

    /// `None` defers to the rest of the chain.
    fn locate(
        &self,
        scope: &Scope,
        ctx: &mut InjectionContext,
        key: &CapabilityKey,
    ) -> Result<Option<Instance>, LocateError>;
}
