//! Scope/strategy resolution engine.
//!
//! A [`ScopeManager`] owns a tree of [`Scope`]s. Each scope holds
//! [`StrategyCollection`]s keyed by [`CapabilityKey`]; a locate call picks the
//! best eligible [`ExportStrategy`] in the nearest scope, activates it under
//! its [`LifetimePolicy`], and falls back to missing-export providers,
//! auto-registration and unknown-export listeners when nothing matches.

use std::any::Any;
use std::sync::Arc;

use crate::errors::LocateError;

pub mod catalog;
pub mod collection;
pub mod condition;
pub mod context;
pub mod disposal;
pub mod inspector;
pub mod key;
pub mod lifetime;
pub mod manager;
pub mod missing_export;
pub mod resolver;
pub mod scope;
pub mod strategy;

pub use catalog::{AutoRegistrar, Constructible, ConstructibleCatalog};
pub use collection::StrategyCollection;
pub use condition::{ExportCondition, FnCondition, WhenExtraData, WhenInjectedInto, WhenScopeNamed};
pub use context::{ExportFilter, InjectionContext, LocateOptions, LocateRequest, ResolutionFrame};
pub use disposal::{CleanupFn, Disposable, DisposalScopeProvider};
pub use inspector::{InjectionValueProviderInspector, SecondaryExportLocator, StrategyInspector};
pub use key::{CapabilityKey, ExportKind, TypeKey};
pub use lifetime::{LifetimePolicy, PerNamedScope, Scoped, Singleton, Transient};
pub use manager::{ScopeInfo, ScopeManager};
pub use missing_export::{MissingExportStrategyProvider, UnknownExport, UnknownExportListener};
pub use resolver::{OverrideTarget, ParameterOverride, Resolver};
pub use scope::{ChildScopeOptions, Scope, ScopeId};
pub use strategy::{
    Activation, DisposalDelegate, ExportBinding, ExportStrategy, Projection, StrategyBuilder, StrategyId,
    StrategySettings,
};

/// An activated value.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) fn downcast_instance<T: Send + Sync + 'static>(
    key: &CapabilityKey,
    instance: Instance,
) -> Result<Arc<T>, LocateError> {
    instance.downcast::<T>().map_err(|_| LocateError::TypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
        actual: "an instance of another type".to_string(),
    })
}

/// Interface exports carry an `Arc<I>` payload.
pub(crate) fn downcast_interface<I: ?Sized + Send + Sync + 'static>(
    key: &CapabilityKey,
    instance: Instance,
) -> Result<Arc<I>, LocateError> {
    instance
        .downcast::<Arc<I>>()
        .map(|payload| (*payload).clone())
        .map_err(|_| LocateError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<Arc<I>>(),
            actual: "an instance of another type".to_string(),
        })
}
