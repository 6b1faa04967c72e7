//! Lifetime policies: whether an activation is cached, where, and which
//! scope owns disposal of the result.

use std::fmt;

use super::scope::Scope;
use super::strategy::StrategyId;
use super::Instance;
use crate::errors::LocateError;

/// Pluggable caching rule for one strategy.
pub trait LifetimePolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The scope that caches the instance and whose disposal releases it.
    ///
    /// `declaring` supplied the strategy; `requesting` is where the caller asked.
    fn owning_scope(&self, declaring: &Scope, requesting: &Scope) -> Result<Scope, LocateError>;

    /// Whether instances are shared between activations.
    fn caches(&self) -> bool {
        true
    }

    /// Return the cached instance for `strategy` in `owner`, running `create`
    /// at most once per owner. Concurrent callers block until the first
    /// creation finishes; a failed creation caches nothing.
    fn get_or_create(
        &self,
        strategy: StrategyId,
        owner: &Scope,
        create: &mut dyn FnMut() -> Result<Instance, LocateError>,
    ) -> Result<Instance, LocateError> {
        owner.cached_instance(strategy, create)
    }
}

/// New instance per activation
#[derive(Debug, Clone, Copy, Default)]
pub struct Transient;

impl LifetimePolicy for Transient {
    fn name(&self) -> &str {
        "transient"
    }

    fn owning_scope(&self, _declaring: &Scope, requesting: &Scope) -> Result<Scope, LocateError> {
        Ok(requesting.clone())
    }

    fn caches(&self) -> bool {
        false
    }

    fn get_or_create(
        &self,
        _strategy: StrategyId,
        _owner: &Scope,
        create: &mut dyn FnMut() -> Result<Instance, LocateError>,
    ) -> Result<Instance, LocateError> {
        create()
    }
}

/// One instance, cached in the scope that registered the strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct Singleton;

impl LifetimePolicy for Singleton {
    fn name(&self) -> &str {
        "singleton"
    }

    fn owning_scope(&self, declaring: &Scope, _requesting: &Scope) -> Result<Scope, LocateError> {
        Ok(declaring.clone())
    }
}

/// One instance per requesting scope, never shared between siblings
#[derive(Debug, Clone, Copy, Default)]
pub struct Scoped;

impl LifetimePolicy for Scoped {
    fn name(&self) -> &str {
        "scoped"
    }

    fn owning_scope(&self, _declaring: &Scope, requesting: &Scope) -> Result<Scope, LocateError> {
        Ok(requesting.clone())
    }
}

/// One instance per nearest enclosing scope with the given name
#[derive(Debug, Clone)]
pub struct PerNamedScope {
    scope_name: String,
}

impl PerNamedScope {
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
        }
    }
}

impl LifetimePolicy for PerNamedScope {
    fn name(&self) -> &str {
        "per_named_scope"
    }

    fn owning_scope(&self, _declaring: &Scope, requesting: &Scope) -> Result<Scope, LocateError> {
        requesting
            .self_and_ancestors()
            .into_iter()
            .find(|scope| scope.name() == self.scope_name)
            .ok_or_else(|| LocateError::NoOwningScope {
                lifetime: format!("per_named_scope({})", self.scope_name),
                scope_name: requesting.name().to_string(),
            })
    }
}
