//! Eligibility predicates attached to strategies.

use super::context::InjectionContext;
use super::key::TypeKey;
use super::scope::Scope;
use super::strategy::ExportStrategy;

/// Decides whether a strategy may serve the current request. Evaluation
/// must not mutate strategy state.
pub trait ExportCondition: Send + Sync {
    /// `scope` is the scope the request was made from.
    fn meets(&self, scope: &Scope, ctx: &InjectionContext, strategy: &ExportStrategy) -> bool;
}

/// Eligible only while building one of the given types
#[derive(Debug, Clone, Default)]
pub struct WhenInjectedInto {
    targets: Vec<TypeKey>,
}

impl WhenInjectedInto {
    pub fn new<T: ?Sized + 'static>() -> Self {
        Self {
            targets: vec![TypeKey::of::<T>()],
        }
    }

    pub fn or_into<T: ?Sized + 'static>(mut self) -> Self {
        self.targets.push(TypeKey::of::<T>());
        self
    }
}

impl ExportCondition for WhenInjectedInto {
    fn meets(&self, _scope: &Scope, ctx: &InjectionContext, _strategy: &ExportStrategy) -> bool {
        ctx.injected_into()
            .map_or(false, |target| self.targets.contains(&target))
    }
}

/// Eligible when the requesting scope, or one of its ancestors, has this name
#[derive(Debug, Clone)]
pub struct WhenScopeNamed {
    name: String,
}

impl WhenScopeNamed {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ExportCondition for WhenScopeNamed {
    fn meets(&self, scope: &Scope, _ctx: &InjectionContext, _strategy: &ExportStrategy) -> bool {
        scope
            .self_and_ancestors()
            .iter()
            .any(|candidate| candidate.name() == self.name)
    }
}

/// Eligible when the locate call carries extra data under this name
#[derive(Debug, Clone)]
pub struct WhenExtraData {
    name: String,
}

impl WhenExtraData {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ExportCondition for WhenExtraData {
    fn meets(&self, _scope: &Scope, ctx: &InjectionContext, _strategy: &ExportStrategy) -> bool {
        ctx.extra_data(&self.name).is_some()
    }
}

/// Closure condition
pub struct FnCondition<F> {
    predicate: F,
}

impl<F> FnCondition<F>
where
    F: Fn(&Scope, &InjectionContext, &ExportStrategy) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> ExportCondition for FnCondition<F>
where
    F: Fn(&Scope, &InjectionContext, &ExportStrategy) -> bool + Send + Sync,
{
    fn meets(&self, scope: &Scope, ctx: &InjectionContext, strategy: &ExportStrategy) -> bool {
        (self.predicate)(scope, ctx, strategy)
    }
}
