//! Types that construct themselves, and the registrar that turns them into
//! strategies on demand.

use dashmap::DashMap;
use std::sync::Arc;

use super::key::{CapabilityKey, ExportKind, TypeKey};
use super::resolver::Resolver;
use super::strategy::{ExportStrategy, StrategyBuilder};
use crate::errors::LocateError;

/// A concrete type able to build itself from its dependencies.
pub trait Constructible: Sized + Send + Sync + 'static {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, LocateError>;
}

/// Synthesizes a strategy for an unregistered concrete type when
/// `auto_register_unknown` is enabled.
pub trait AutoRegistrar: Send + Sync {
    fn synthesize(&self, key: &CapabilityKey) -> Option<Arc<ExportStrategy>>;
}

type Template = Arc<dyn Fn() -> Arc<ExportStrategy> + Send + Sync>;

/// Default registrar: types are declared up front and only materialized as
/// strategies when first requested.
#[derive(Default)]
pub struct ConstructibleCatalog {
    templates: DashMap<TypeKey, Template>,
}

impl ConstructibleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `T` with the default (transient) constructor strategy.
    pub fn declare<T: Constructible>(&self) {
        self.declare_with::<T, _>(|builder| builder);
    }

    /// Declare `T`, shaping the synthesized strategy with `configure`.
    pub fn declare_with<T, F>(&self, configure: F)
    where
        T: Constructible,
        F: Fn(StrategyBuilder<T>) -> StrategyBuilder<T> + Send + Sync + 'static,
    {
        let template: Template = Arc::new(move || configure(ExportStrategy::constructor::<T>()).build());
        self.templates.insert(TypeKey::of::<T>(), template);
    }

    pub fn is_declared<T: 'static>(&self) -> bool {
        self.templates.contains_key(&TypeKey::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl AutoRegistrar for ConstructibleCatalog {
    fn synthesize(&self, key: &CapabilityKey) -> Option<Arc<ExportStrategy>> {
        if key.key().is_some() {
            return None;
        }
        let ExportKind::Type(type_key) = key.kind() else {
            return None;
        };

        // Clone out of the map before running user code
        let template = self.templates.get(type_key).map(|entry| entry.value().clone())?;
        Some(template())
    }
}

impl std::fmt::Debug for ConstructibleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructibleCatalog")
            .field("declared", &self.templates.len())
            .finish()
    }
}
