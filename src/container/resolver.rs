//! Dependency access for factories and constructors.

use std::fmt;
use std::sync::Arc;

use super::context::{InjectionContext, LocateRequest};
use super::key::{CapabilityKey, ExportKind, TypeKey};
use super::scope::Scope;
use super::{downcast_instance, downcast_interface, Instance};
use crate::errors::LocateError;

type OverrideFactory = Arc<dyn Fn(&Scope) -> Result<Instance, LocateError> + Send + Sync>;

#[derive(Clone)]
enum OverrideValue {
    Instance(Instance),
    Factory(OverrideFactory),
}

/// What a parameter override replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideTarget {
    Type(TypeKey),
    Name(String),
}

/// A value supplied to a strategy's factory ahead of the scope chain.
#[derive(Clone)]
pub struct ParameterOverride {
    target: OverrideTarget,
    value: OverrideValue,
}

impl ParameterOverride {
    pub fn by_type<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            target: OverrideTarget::Type(TypeKey::of::<T>()),
            value: OverrideValue::Instance(Arc::new(value)),
        }
    }

    pub fn by_name<T: Send + Sync + 'static>(name: impl Into<String>, value: T) -> Self {
        Self {
            target: OverrideTarget::Name(name.into()),
            value: OverrideValue::Instance(Arc::new(value)),
        }
    }

    /// Computed per activation from the owning scope.
    pub fn by_type_with<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, LocateError> + Send + Sync + 'static,
    {
        Self {
            target: OverrideTarget::Type(TypeKey::of::<T>()),
            value: OverrideValue::Factory(Arc::new(move |scope: &Scope| {
                factory(scope).map(|value| Arc::new(value) as Instance)
            })),
        }
    }

    pub fn target(&self) -> &OverrideTarget {
        &self.target
    }

    fn matches(&self, key: &CapabilityKey) -> bool {
        match (&self.target, key.kind()) {
            (OverrideTarget::Type(target), ExportKind::Type(requested)) => target == requested,
            (OverrideTarget::Name(target), ExportKind::Name(requested)) => target == requested,
            _ => false,
        }
    }

    fn value(&self, scope: &Scope) -> Result<Instance, LocateError> {
        match &self.value {
            OverrideValue::Instance(instance) => Ok(instance.clone()),
            OverrideValue::Factory(factory) => factory(scope),
        }
    }
}

impl fmt::Debug for ParameterOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterOverride")
            .field("target", &self.target)
            .finish()
    }
}

/// Handed to factories and constructors. Nested requests share the caller's
/// context, so cycles across the whole graph are detected.
pub struct Resolver<'a> {
    scope: &'a Scope,
    ctx: &'a mut InjectionContext,
    overrides: &'a [ParameterOverride],
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        scope: &'a Scope,
        ctx: &'a mut InjectionContext,
        overrides: &'a [ParameterOverride],
    ) -> Self {
        Self { scope, ctx, overrides }
    }

    /// The scope that owns the instance being built.
    pub fn scope(&self) -> &Scope {
        self.scope
    }

    pub fn context(&self) -> &InjectionContext {
        self.ctx
    }

    pub fn context_mut(&mut self) -> &mut InjectionContext {
        self.ctx
    }

    /// Required dependency; `NotLocated` if nothing supplies it.
    pub fn locate<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        let instance = self.require(key.clone())?;
        downcast_instance::<T>(&key, instance)
    }

    pub fn locate_keyed<T: Send + Sync + 'static>(&mut self, discriminator: &str) -> Result<Arc<T>, LocateError> {
        let key = CapabilityKey::of_type::<T>().with_key(discriminator);
        let instance = self.require(key.clone())?;
        downcast_instance::<T>(&key, instance)
    }

    pub fn locate_as<I: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<I>, LocateError> {
        let key = CapabilityKey::of_type::<I>();
        let instance = self.require(key.clone())?;
        downcast_interface::<I>(&key, instance)
    }

    pub fn locate_named<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>, LocateError> {
        let key = CapabilityKey::named(name);
        let instance = self.require(key.clone())?;
        downcast_instance::<T>(&key, instance)
    }

    /// Optional dependency.
    pub fn try_locate<T: Send + Sync + 'static>(&mut self) -> Result<Option<Arc<T>>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        self.resolve(key.clone())?
            .map(|instance| downcast_instance::<T>(&key, instance))
            .transpose()
    }

    pub fn locate_all<T: Send + Sync + 'static>(&mut self) -> Result<Vec<Arc<T>>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        let scope = self.scope;
        let request = LocateRequest::new(key.clone(), None);
        let instances = self
            .ctx
            .with_request(request, |ctx| scope.collect_all(ctx))?;
        instances
            .into_iter()
            .map(|instance| downcast_instance::<T>(&key, instance))
            .collect()
    }

    /// Extra data passed to the top-level locate call.
    pub fn extra_data<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.ctx
            .extra_data(name)
            .and_then(|instance| instance.clone().downcast::<T>().ok())
    }

    fn require(&mut self, key: CapabilityKey) -> Result<Instance, LocateError> {
        match self.resolve(key.clone())? {
            Some(instance) => Ok(instance),
            None => Err(LocateError::NotLocated {
                key: key.to_string(),
                scope_chain: self.scope.scope_chain(),
            }),
        }
    }

    fn resolve(&mut self, key: CapabilityKey) -> Result<Option<Instance>, LocateError> {
        if let Some(parameter) = self.overrides.iter().find(|parameter| parameter.matches(&key)) {
            return parameter.value(self.scope).map(Some);
        }

        // Named dependencies may be satisfied by extra data
        if let Some(name) = key.name() {
            if let Some(instance) = self.ctx.extra_data(name) {
                return Ok(Some(instance.clone()));
            }
        }

        let scope = self.scope;
        let request = LocateRequest::new(key, None);
        self.ctx
            .with_request(request, |ctx| scope.resolve_request(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ExportStrategy, LocateOptions, ScopeManager};

    #[derive(Debug)]
    struct Settings {
        url: String,
    }

    #[derive(Debug)]
    struct Client {
        url: String,
        retries: Arc<u32>,
    }

    #[test]
    fn test_override_wins_over_registration() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(ExportStrategy::instance(Settings { url: "prod".into() }).build())
            .unwrap();
        root.add_strategy(
            ExportStrategy::factory(|r| {
                Ok(Client {
                    url: r.locate::<Settings>()?.url.clone(),
                    retries: r.locate_named::<u32>("retries")?,
                })
            })
            .with_override(ParameterOverride::by_type(Settings { url: "test".into() }))
            .with_override(ParameterOverride::by_name("retries", 3u32))
            .build(),
        )
        .unwrap();

        let client = root.locate::<Client>().unwrap().unwrap();
        assert_eq!(client.url, "test");
        assert_eq!(*client.retries, 3);
    }

    #[test]
    fn test_named_dependency_from_extra_data() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(
            ExportStrategy::factory(|r| {
                Ok(Client {
                    url: r.extra_data::<String>("url").map(|u| (*u).clone()).unwrap_or_default(),
                    retries: r.locate_named::<u32>("retries")?,
                })
            })
            .build(),
        )
        .unwrap();

        let options = LocateOptions::new()
            .with_extra_data("retries", 5u32)
            .with_extra_data("url", "http://local".to_string());
        let client = root.locate_with::<Client>(options).unwrap().unwrap();
        assert_eq!(*client.retries, 5);
        assert_eq!(client.url, "http://local");
    }

    #[test]
    fn test_missing_required_dependency() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(
            ExportStrategy::factory(|r| {
                Ok(Client {
                    url: r.locate::<Settings>()?.url.clone(),
                    retries: Arc::new(0),
                })
            })
            .build(),
        )
        .unwrap();

        let err = root.locate::<Client>().unwrap_err();
        assert!(err.is_not_located());
    }

    #[test]
    fn test_optional_dependency() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(
            ExportStrategy::factory(|r| {
                let url = r
                    .try_locate::<Settings>()?
                    .map(|s| s.url.clone())
                    .unwrap_or_else(|| "fallback".to_string());
                Ok(Client { url, retries: Arc::new(1) })
            })
            .build(),
        )
        .unwrap();

        assert_eq!(root.locate::<Client>().unwrap().unwrap().url, "fallback");
    }
}
