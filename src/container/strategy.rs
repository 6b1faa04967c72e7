//! Export strategies: the providers that produce instances for capability keys.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::catalog::Constructible;
use super::condition::{ExportCondition, FnCondition};
use super::context::{InjectionContext, ResolutionFrame};
use super::disposal::{CleanupFn, Disposable, DisposalEntry};
use super::key::{CapabilityKey, TypeKey};
use super::lifetime::{LifetimePolicy, PerNamedScope, Scoped, Singleton, Transient};
use super::resolver::{ParameterOverride, Resolver};
use super::scope::Scope;
use super::Instance;
use crate::errors::LocateError;

static NEXT_STRATEGY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique strategy identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(u64);

impl StrategyId {
    fn next() -> Self {
        StrategyId(NEXT_STRATEGY_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        StrategyId(raw)
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type FactoryFn =
    Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance, LocateError> + Send + Sync>;

/// Converts the cached concrete instance into the payload stored for an
/// interface export.
pub type Projection = Arc<dyn Fn(Instance) -> Option<Instance> + Send + Sync>;

/// Invoked with the instance before it is released at scope disposal.
pub type DisposalDelegate = Arc<dyn Fn(&Instance) + Send + Sync>;

type DisposableView = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Disposable>> + Send + Sync>;

/// How a strategy produces its value.
#[derive(Clone)]
pub enum Activation {
    /// A pre-built value
    Instance(Instance),
    /// A closure building the value from a resolver
    Factory(FactoryFn),
    /// A [`Constructible`] type building itself
    Constructor(FactoryFn),
}

impl Activation {
    pub fn kind(&self) -> &'static str {
        match self {
            Activation::Instance(_) => "instance",
            Activation::Factory(_) => "factory",
            Activation::Constructor(_) => "constructor",
        }
    }
}

/// One capability key a strategy is exported under.
#[derive(Clone)]
pub struct ExportBinding {
    key: CapabilityKey,
    projection: Option<Projection>,
}

impl ExportBinding {
    pub fn key(&self) -> &CapabilityKey {
        &self.key
    }
}

/// Settings that may change after construction. Mutating them while a
/// resolution is in flight gives unspecified (but memory-safe) results.
#[derive(Clone)]
pub struct StrategySettings {
    pub priority: i32,
    pub lifetime: Arc<dyn LifetimePolicy>,
    /// Instances are never added to a disposal set
    pub externally_owned: bool,
    pub conditions: Vec<Arc<dyn ExportCondition>>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub disposal_delegate: Option<DisposalDelegate>,
    pub overrides: Vec<ParameterOverride>,
}

impl fmt::Debug for StrategySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySettings")
            .field("priority", &self.priority)
            .field("lifetime", &self.lifetime.name())
            .field("externally_owned", &self.externally_owned)
            .field("conditions", &self.conditions.len())
            .field("metadata", &self.metadata)
            .field("disposal_delegate", &self.disposal_delegate.is_some())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

/// A registered provider. Identity is by reference (`Arc::ptr_eq`) and by
/// [`StrategyId`].
pub struct ExportStrategy {
    id: StrategyId,
    activation: Activation,
    activation_type: TypeKey,
    exports: Vec<ExportBinding>,
    disposable_view: Option<DisposableView>,
    settings: RwLock<StrategySettings>,
}

impl ExportStrategy {
    /// Strategy returning a pre-built value. Externally owned and cached by default.
    pub fn instance<T: Send + Sync + 'static>(value: T) -> StrategyBuilder<T> {
        Self::instance_arc(Arc::new(value))
    }

    pub fn instance_arc<T: Send + Sync + 'static>(value: Arc<T>) -> StrategyBuilder<T> {
        let instance: Instance = value;
        StrategyBuilder::new(Activation::Instance(instance), Arc::new(Singleton), true)
    }

    /// Strategy building its value with a closure. Transient by default.
    pub fn factory<T, F>(factory: F) -> StrategyBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, LocateError> + Send + Sync + 'static,
    {
        let factory: FactoryFn = Arc::new(move |resolver: &mut Resolver<'_>| {
            factory(resolver).map(|value| Arc::new(value) as Instance)
        });
        StrategyBuilder::new(Activation::Factory(factory), Arc::new(Transient), false)
    }

    /// Strategy for a type that knows how to construct itself. Transient by default.
    pub fn constructor<T: Constructible>() -> StrategyBuilder<T> {
        let factory: FactoryFn = Arc::new(|resolver: &mut Resolver<'_>| {
            T::construct(resolver).map(|value| Arc::new(value) as Instance)
        });
        StrategyBuilder::new(Activation::Constructor(factory), Arc::new(Transient), false)
    }

    pub fn id(&self) -> StrategyId {
        self.id
    }

    pub fn activation_type(&self) -> TypeKey {
        self.activation_type
    }

    pub fn activation_kind(&self) -> &'static str {
        self.activation.kind()
    }

    pub fn exports(&self) -> &[ExportBinding] {
        &self.exports
    }

    pub fn export_keys(&self) -> impl Iterator<Item = &CapabilityKey> {
        self.exports.iter().map(|binding| &binding.key)
    }

    /// Snapshot of the mutable settings.
    pub fn settings(&self) -> StrategySettings {
        self.settings.read().clone()
    }

    pub fn priority(&self) -> i32 {
        self.settings.read().priority
    }

    pub fn set_priority(&self, priority: i32) {
        self.settings.write().priority = priority;
    }

    pub fn lifetime(&self) -> Arc<dyn LifetimePolicy> {
        self.settings.read().lifetime.clone()
    }

    pub fn set_lifetime(&self, lifetime: Arc<dyn LifetimePolicy>) {
        self.settings.write().lifetime = lifetime;
    }

    pub fn is_externally_owned(&self) -> bool {
        self.settings.read().externally_owned
    }

    pub fn add_condition(&self, condition: Arc<dyn ExportCondition>) {
        self.settings.write().conditions.push(condition);
    }

    pub fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.settings.read().metadata.get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.settings.write().metadata.insert(key.into(), value.into());
    }

    pub fn set_disposal_delegate(&self, delegate: Option<DisposalDelegate>) {
        self.settings.write().disposal_delegate = delegate;
    }

    pub fn add_overrides(&self, overrides: impl IntoIterator<Item = ParameterOverride>) {
        self.settings.write().overrides.extend(overrides);
    }

    /// All conditions pass for a request made from `scope`.
    pub fn meets_conditions(&self, scope: &Scope, ctx: &InjectionContext) -> bool {
        // Clone out so conditions may read settings without holding the lock
        let conditions = self.settings.read().conditions.clone();
        conditions.iter().all(|condition| condition.meets(scope, ctx, self))
    }

    /// Produce (or fetch the cached) instance for the request in `ctx`.
    ///
    /// `declaring` is the scope whose collection supplied this strategy,
    /// `requesting` the scope the caller asked.
    pub fn activate(
        &self,
        declaring: &Scope,
        requesting: &Scope,
        ctx: &mut InjectionContext,
    ) -> Result<Instance, LocateError> {
        let key = ctx.request().key().clone();
        let settings = self.settings();

        ctx.enter(ResolutionFrame {
            key: key.clone(),
            activation_type: self.activation_type,
            strategy: self.id,
        })?;
        let result = self.activate_with(declaring, requesting, ctx, &settings);
        ctx.exit();

        self.project(&key, result?)
    }

    fn activate_with(
        &self,
        declaring: &Scope,
        requesting: &Scope,
        ctx: &mut InjectionContext,
        settings: &StrategySettings,
    ) -> Result<Instance, LocateError> {
        let lifetime = settings.lifetime.clone();
        let owner = lifetime.owning_scope(declaring, requesting)?;
        let caches = lifetime.caches();
        let track = !settings.externally_owned && (caches || ctx.config().track_disposable_transients);

        lifetime.get_or_create(self.id, &owner, &mut || {
            let mark = ctx.staged_mark();
            let instance = self.produce(&owner, ctx, settings)?;
            if caches {
                // A published instance keeps its dependencies, so their
                // entries become permanent with it
                Scope::commit_staged(ctx.take_staged_since(mark))?;
            }
            if track {
                self.track_disposal(&owner, &instance, settings, caches, ctx)?;
            }
            Ok(instance)
        })
    }

    fn produce(
        &self,
        owner: &Scope,
        ctx: &mut InjectionContext,
        settings: &StrategySettings,
    ) -> Result<Instance, LocateError> {
        match &self.activation {
            Activation::Instance(value) => Ok(value.clone()),
            Activation::Factory(factory) | Activation::Constructor(factory) => {
                let mut resolver = Resolver::new(owner, ctx, &settings.overrides);
                factory(&mut resolver)
            }
        }
    }

    /// Cached instances are tracked at once. Uncached ones are staged on the
    /// context and only reach a disposal set if the whole call succeeds.
    fn track_disposal(
        &self,
        owner: &Scope,
        instance: &Instance,
        settings: &StrategySettings,
        caches: bool,
        ctx: &mut InjectionContext,
    ) -> Result<(), LocateError> {
        let disposable = self.disposable_view.as_ref().and_then(|view| view(instance));
        if disposable.is_none() && settings.disposal_delegate.is_none() {
            return Ok(());
        }

        let cleanup = settings.disposal_delegate.clone().map(|delegate| {
            Box::new(move |instance: &Instance| delegate(instance)) as CleanupFn
        });
        let entry = DisposalEntry::new(instance.clone(), disposable, cleanup);
        if caches {
            owner.track_entry(entry)
        } else {
            ctx.stage_disposal(owner.disposal_target(), entry);
            Ok(())
        }
    }

    fn project(&self, key: &CapabilityKey, instance: Instance) -> Result<Instance, LocateError> {
        let projection = self
            .exports
            .iter()
            .find(|binding| &binding.key == key)
            .and_then(|binding| binding.projection.clone());

        match projection {
            None => Ok(instance),
            Some(project) => project(instance).ok_or_else(|| LocateError::TypeMismatch {
                key: key.to_string(),
                expected: self.activation_type.name(),
                actual: "an instance of another type".to_string(),
            }),
        }
    }
}

impl fmt::Debug for ExportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportStrategy")
            .field("id", &self.id)
            .field("activation", &self.activation.kind())
            .field("activation_type", &self.activation_type)
            .field("exports", &self.export_keys().map(|k| k.to_string()).collect::<Vec<_>>())
            .field("settings", &*self.settings.read())
            .finish()
    }
}

/// Builder for [`ExportStrategy`].
pub struct StrategyBuilder<T> {
    activation: Activation,
    exports: Vec<ExportBinding>,
    key: Option<String>,
    settings: StrategySettings,
    disposable_view: Option<DisposableView>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> StrategyBuilder<T> {
    fn new(activation: Activation, lifetime: Arc<dyn LifetimePolicy>, externally_owned: bool) -> Self {
        Self {
            activation,
            exports: Vec::new(),
            key: None,
            settings: StrategySettings {
                priority: 0,
                lifetime,
                externally_owned,
                conditions: Vec::new(),
                metadata: HashMap::new(),
                disposal_delegate: None,
                overrides: Vec::new(),
            },
            disposable_view: None,
            _marker: PhantomData,
        }
    }

    /// Export under `T` itself. Implied when no other export is declared.
    pub fn export_as_self(mut self) -> Self {
        self.push_export(CapabilityKey::of_type::<T>(), None);
        self
    }

    /// Export under an interface type. Locate it with `locate_as::<I>()`.
    pub fn export_as<I, F>(mut self, cast: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        let projection: Projection = Arc::new(move |instance: Instance| {
            instance
                .downcast::<T>()
                .ok()
                .map(|concrete| Arc::new(cast(concrete)) as Instance)
        });
        self.push_export(CapabilityKey::of_type::<I>(), Some(projection));
        self
    }

    pub fn export_named(mut self, name: impl Into<String>) -> Self {
        self.push_export(CapabilityKey::named(name), None);
        self
    }

    /// Discriminator key applied to every export of this strategy.
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.settings.priority = priority;
        self
    }

    pub fn lifetime(mut self, lifetime: Arc<dyn LifetimePolicy>) -> Self {
        self.settings.lifetime = lifetime;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifetime(Arc::new(Singleton))
    }

    pub fn scoped(self) -> Self {
        self.lifetime(Arc::new(Scoped))
    }

    pub fn transient(self) -> Self {
        self.lifetime(Arc::new(Transient))
    }

    pub fn per_named_scope(self, name: impl Into<String>) -> Self {
        self.lifetime(Arc::new(PerNamedScope::new(name)))
    }

    pub fn externally_owned(mut self) -> Self {
        self.settings.externally_owned = true;
        self
    }

    /// Let the container dispose what this strategy produces.
    pub fn owned_by_container(mut self) -> Self {
        self.settings.externally_owned = false;
        self
    }

    pub fn when(mut self, condition: impl ExportCondition + 'static) -> Self {
        self.settings.conditions.push(Arc::new(condition));
        self
    }

    pub fn when_fn<F>(self, condition: F) -> Self
    where
        F: Fn(&Scope, &InjectionContext, &ExportStrategy) -> bool + Send + Sync + 'static,
    {
        self.when(FnCondition::new(condition))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.metadata.insert(key.into(), value.into());
        self
    }

    /// Cleanup hook run before the instance is released at scope disposal.
    pub fn on_dispose<F>(mut self, cleanup: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.settings.disposal_delegate = Some(Arc::new(move |instance: &Instance| {
            if let Some(value) = instance.downcast_ref::<T>() {
                cleanup(value);
            }
        }));
        self
    }

    pub fn with_override(mut self, parameter: ParameterOverride) -> Self {
        self.settings.overrides.push(parameter);
        self
    }

    pub fn build(mut self) -> Arc<ExportStrategy> {
        if self.exports.is_empty() {
            self.push_export(CapabilityKey::of_type::<T>(), None);
        }

        let key = self.key.take();
        let exports = self
            .exports
            .into_iter()
            .map(|binding| ExportBinding {
                key: binding.key.with_optional_key(key.clone()),
                projection: binding.projection,
            })
            .collect();

        Arc::new(ExportStrategy {
            id: StrategyId::next(),
            activation: self.activation,
            activation_type: TypeKey::of::<T>(),
            exports,
            disposable_view: self.disposable_view,
            settings: RwLock::new(self.settings),
        })
    }

    fn push_export(&mut self, key: CapabilityKey, projection: Option<Projection>) {
        // One membership per key
        self.exports.retain(|binding| binding.key != key);
        self.exports.push(ExportBinding { key, projection });
    }
}

impl<T: Disposable + 'static> StrategyBuilder<T> {
    /// Dispose produced instances through [`Disposable`] when the owning
    /// scope is disposed (unless externally owned).
    pub fn disposable(mut self) -> Self {
        self.disposable_view = Some(Arc::new(|instance: &Instance| {
            instance
                .clone()
                .downcast::<T>()
                .ok()
                .map(|value| value as Arc<dyn Disposable>)
        }));
        self
    }
}
