//! Scopes: nodes of the resolution and disposal hierarchy.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::collection::StrategyCollection;
use super::context::{InjectionContext, LocateOptions, LocateRequest, StagedDisposal};
use super::disposal::{release_all, CleanupFn, Disposable, DisposalEntry, DisposalScopeProvider, DisposalSet};
use super::inspector::{InjectionValueProviderInspector, SecondaryExportLocator, StrategyInspector};
use super::key::CapabilityKey;
use super::manager::ManagerShared;
use super::missing_export::{self, MissingExportStrategyProvider};
use super::strategy::{ExportStrategy, StrategyId};
use super::{downcast_instance, downcast_interface, Instance};
use crate::errors::LocateError;
use crate::logging::OperationTimer;

/// Globally unique scope identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    pub(crate) fn new() -> Self {
        ScopeId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Registration = Box<dyn FnOnce(&Scope) -> Result<(), LocateError> + Send>;

/// Parameters for [`Scope::create_child_scope_with`].
#[derive(Default)]
pub struct ChildScopeOptions {
    pub name: Option<String>,
    pub disposal_scope_provider: Option<Arc<dyn DisposalScopeProvider>>,
    /// Runs against the new scope before it is returned
    pub registration: Option<Registration>,
}

impl ChildScopeOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_disposal_scope_provider(mut self, provider: impl DisposalScopeProvider + 'static) -> Self {
        self.disposal_scope_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_registration<F>(mut self, registration: F) -> Self
    where
        F: FnOnce(&Scope) -> Result<(), LocateError> + Send + 'static,
    {
        self.registration = Some(Box::new(registration));
        self
    }
}

impl fmt::Debug for ChildScopeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildScopeOptions")
            .field("name", &self.name)
            .field("disposal_scope_provider", &self.disposal_scope_provider.is_some())
            .field("registration", &self.registration.is_some())
            .finish()
    }
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    name: String,
    parent: Option<ScopeId>,
    depth: usize,
    manager: Arc<ManagerShared>,
    disposed: AtomicBool,
    collections: DashMap<CapabilityKey, Arc<StrategyCollection>>,
    instances: DashMap<StrategyId, Arc<OnceCell<Instance>>>,
    disposables: Mutex<DisposalSet>,
    disposal_target: OnceCell<ScopeId>,
    children: Mutex<Vec<Scope>>,
    secondary_locators: RwLock<Vec<Arc<dyn SecondaryExportLocator>>>,
    missing_export_providers: RwLock<Vec<Arc<dyn MissingExportStrategyProvider>>>,
    strategy_inspectors: RwLock<Vec<Arc<dyn StrategyInspector>>>,
    value_inspectors: RwLock<Vec<Arc<dyn InjectionValueProviderInspector>>>,
}

/// Handle to a scope. Cheap to clone; every clone refers to the same node.
///
/// A scope holds its children strongly and its parent only by [`ScopeId`],
/// looked up in the manager's table, so a child never keeps its parent alive.
/// Dropping a child handle does not detach it: a child stays in its parent
/// until [`Scope::dispose`] is called on it or on an ancestor.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(
        manager: Arc<ManagerShared>,
        name: String,
        parent: Option<&Scope>,
    ) -> Self {
        let inner = ScopeInner {
            id: ScopeId::new(),
            name,
            parent: parent.map(|p| p.id()),
            depth: parent.map_or(0, |p| p.depth() + 1),
            manager,
            disposed: AtomicBool::new(false),
            collections: DashMap::new(),
            instances: DashMap::new(),
            disposables: Mutex::new(DisposalSet::default()),
            disposal_target: OnceCell::new(),
            children: Mutex::new(Vec::new()),
            secondary_locators: RwLock::new(Vec::new()),
            missing_export_providers: RwLock::new(Vec::new()),
            strategy_inspectors: RwLock::new(Vec::new()),
            value_inspectors: RwLock::new(Vec::new()),
        };
        let scope = Scope { inner: Arc::new(inner) };
        scope.inner.manager.register(&scope);
        scope
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Scope { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn manager(&self) -> &ManagerShared {
        &self.inner.manager
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn parent_id(&self) -> Option<ScopeId> {
        self.inner.parent
    }

    /// `Ok(None)` for the root; `ParentUnavailable` once the parent is gone.
    pub fn parent(&self) -> Result<Option<Scope>, LocateError> {
        match self.inner.parent {
            None => Ok(None),
            Some(id) => self
                .inner
                .manager
                .lookup(id)
                .map(Some)
                .ok_or_else(|| LocateError::ParentUnavailable {
                    scope_name: self.inner.name.clone(),
                }),
        }
    }

    /// This scope first, then each ancestor up to the root. Stops early at a
    /// parent that is no longer alive.
    pub fn self_and_ancestors(&self) -> Vec<Scope> {
        let mut chain = Vec::with_capacity(self.inner.depth + 1);
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            current = scope.parent().ok().flatten();
            chain.push(scope);
        }
        chain
    }

    pub fn root(&self) -> Result<Scope, LocateError> {
        let mut current = self.clone();
        while let Some(parent) = current.parent()? {
            current = parent;
        }
        Ok(current)
    }

    /// Names from this scope up to the root, for diagnostics.
    pub fn scope_chain(&self) -> Vec<String> {
        self.self_and_ancestors()
            .iter()
            .map(|scope| scope.name().to_string())
            .collect()
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.lock().clone()
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), LocateError> {
        if self.is_disposed() {
            return Err(self.disposed_error(operation));
        }
        Ok(())
    }

    fn disposed_error(&self, operation: &'static str) -> LocateError {
        warn!(scope = %self.inner.name, id = %self.inner.id, operation, "Operation on disposed scope");
        LocateError::ScopeDisposed {
            scope_id: self.inner.id,
            scope_name: self.inner.name.clone(),
            operation,
        }
    }

    // ---- Locate ----

    /// Locate `T`. `Ok(None)` when nothing supplies it, unless
    /// `throw_exceptions` is set, in which case `NotLocated` is raised.
    pub fn locate<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, LocateError> {
        self.locate_with::<T>(LocateOptions::default())
    }

    pub fn locate_with<T: Send + Sync + 'static>(
        &self,
        options: LocateOptions,
    ) -> Result<Option<Arc<T>>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        self.locate_key(key.clone(), options)?
            .map(|instance| downcast_instance::<T>(&key, instance))
            .transpose()
    }

    /// Locate an interface export, e.g. `locate_as::<dyn Repository>()`.
    pub fn locate_as<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<I>>, LocateError> {
        let key = CapabilityKey::of_type::<I>();
        self.locate_key(key.clone(), LocateOptions::default())?
            .map(|instance| downcast_interface::<I>(&key, instance))
            .transpose()
    }

    pub fn locate_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>, LocateError> {
        let key = CapabilityKey::named(name);
        self.locate_key(key.clone(), LocateOptions::default())?
            .map(|instance| downcast_instance::<T>(&key, instance))
            .transpose()
    }

    /// Untyped locate; a discriminator in `options` is applied to `key`.
    pub fn locate_key(&self, key: CapabilityKey, options: LocateOptions) -> Result<Option<Instance>, LocateError> {
        let mut ctx = self.new_context(key, options);
        match Self::settle(&mut ctx, |ctx| self.resolve_request(ctx))? {
            Some(instance) => Ok(Some(instance)),
            None if ctx.config().throw_exceptions => Err(LocateError::NotLocated {
                key: ctx.request().key().to_string(),
                scope_chain: self.scope_chain(),
            }),
            None => Ok(None),
        }
    }

    /// Same resolution as [`Scope::locate`], but a missing export is never an error.
    pub fn try_locate<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, LocateError> {
        self.try_locate_with::<T>(LocateOptions::default())
    }

    pub fn try_locate_with<T: Send + Sync + 'static>(
        &self,
        options: LocateOptions,
    ) -> Result<Option<Arc<T>>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        self.try_locate_key(key.clone(), options)?
            .map(|instance| downcast_instance::<T>(&key, instance))
            .transpose()
    }

    pub fn try_locate_as<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<I>>, LocateError> {
        let key = CapabilityKey::of_type::<I>();
        self.try_locate_key(key.clone(), LocateOptions::default())?
            .map(|instance| downcast_interface::<I>(&key, instance))
            .transpose()
    }

    pub fn try_locate_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>, LocateError> {
        let key = CapabilityKey::named(name);
        self.try_locate_key(key.clone(), LocateOptions::default())?
            .map(|instance| downcast_instance::<T>(&key, instance))
            .transpose()
    }

    pub fn try_locate_key(&self, key: CapabilityKey, options: LocateOptions) -> Result<Option<Instance>, LocateError> {
        let mut ctx = self.new_context(key, options);
        Self::settle(&mut ctx, |ctx| self.resolve_request(ctx))
    }

    /// Every eligible export of `T` in the chain, best first within each
    /// scope, nearest scope first. Empty when nothing matches.
    pub fn locate_all<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, LocateError> {
        let key = CapabilityKey::of_type::<T>();
        self.locate_all_key(key.clone(), LocateOptions::default())?
            .into_iter()
            .map(|instance| downcast_instance::<T>(&key, instance))
            .collect()
    }

    /// [`Scope::locate_all`] reordered by a caller-supplied comparator.
    pub fn locate_all_sorted<T, F>(&self, compare: F) -> Result<Vec<Arc<T>>, LocateError>
    where
        T: Send + Sync + 'static,
        F: FnMut(&Arc<T>, &Arc<T>) -> CmpOrdering,
    {
        let mut all = self.locate_all::<T>()?;
        all.sort_by(compare);
        Ok(all)
    }

    pub fn locate_all_key(&self, key: CapabilityKey, options: LocateOptions) -> Result<Vec<Instance>, LocateError> {
        let mut ctx = self.new_context(key, options);
        Self::settle(&mut ctx, |ctx| self.collect_all(ctx))
    }

    /// Run a top-level resolution. Disposal entries staged along the way are
    /// committed if it succeeds and released if it fails, so a failed call
    /// leaves no entries behind.
    fn settle<R>(
        ctx: &mut InjectionContext,
        resolve: impl FnOnce(&mut InjectionContext) -> Result<R, LocateError>,
    ) -> Result<R, LocateError> {
        let result = resolve(ctx);
        let staged = ctx.take_staged_since(0);
        match result {
            Ok(value) => {
                Self::commit_staged(staged)?;
                Ok(value)
            }
            Err(err) => {
                if !staged.is_empty() {
                    debug!(count = staged.len(), error = %err, "Releasing instances of a failed resolution");
                }
                release_all(staged.into_iter().rev().map(|staged| staged.entry).collect());
                Err(err)
            }
        }
    }

    pub(crate) fn new_context(&self, key: CapabilityKey, options: LocateOptions) -> InjectionContext {
        let key = match options.key {
            Some(discriminator) => key.with_key(discriminator),
            None => key,
        };
        InjectionContext::new(
            LocateRequest::new(key, options.filter),
            options.extra_data,
            self.inner.manager.config(),
        )
    }

    /// Full resolution of the request in `ctx`: the scope chain, then the
    /// missing-export fallbacks.
    pub(crate) fn resolve_request(&self, ctx: &mut InjectionContext) -> Result<Option<Instance>, LocateError> {
        self.ensure_active("locate")?;
        if let Some(instance) = self.locate_in_chain(ctx)? {
            return Ok(Some(instance));
        }
        trace!(key = %ctx.request().key(), scope = %self.inner.name, "No strategy in chain");
        missing_export::resolve_missing(self, ctx)
    }

    /// Walk from this scope to the root. Ancestors activate with this scope as
    /// the requesting scope.
    pub(crate) fn locate_in_chain(&self, ctx: &mut InjectionContext) -> Result<Option<Instance>, LocateError> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if let Some(instance) = scope.locate_local(self, ctx)? {
                return Ok(Some(instance));
            }
            current = scope.parent()?;
        }
        Ok(None)
    }

    fn locate_local(&self, requesting: &Scope, ctx: &mut InjectionContext) -> Result<Option<Instance>, LocateError> {
        let key = ctx.request().key().clone();
        let filter = ctx.request().filter().cloned();

        if let Some(collection) = self.get_strategy_collection(&key, false) {
            if let Some(strategy) = collection.get_strategy(requesting, ctx, filter.as_ref()) {
                trace!(key = %key, strategy = %strategy.id(), scope = %self.inner.name, "Selected strategy");
                return strategy.activate(self, requesting, ctx).map(Some);
            }
        }

        for locator in self.secondary_locators() {
            if locator.can_locate(requesting, &key) {
                if let Some(instance) = locator.locate(requesting, ctx, &key)? {
                    return Ok(Some(instance));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn collect_all(&self, ctx: &mut InjectionContext) -> Result<Vec<Instance>, LocateError> {
        self.ensure_active("locate")?;
        let key = ctx.request().key().clone();
        let filter = ctx.request().filter().cloned();
        let mut seen = HashSet::new();
        let mut instances = Vec::new();

        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if let Some(collection) = scope.get_strategy_collection(&key, false) {
                for strategy in collection.get_strategies(self, ctx, filter.as_ref()) {
                    // A strategy shared by several scopes contributes once
                    if seen.insert(strategy.id()) {
                        instances.push(strategy.activate(&scope, self, ctx)?);
                    }
                }
            }
            for locator in scope.secondary_locators() {
                if locator.can_locate(self, &key) {
                    if let Some(instance) = locator.locate(self, ctx, &key)? {
                        instances.push(instance);
                    }
                }
            }
            current = scope.parent()?;
        }
        Ok(instances)
    }

    // ---- Strategies ----

    /// Register `strategy` under each of its exports. Inspectors of this
    /// scope and its ancestors run first. Adding a strategy twice is a no-op.
    pub fn add_strategy(&self, strategy: Arc<ExportStrategy>) -> Result<(), LocateError> {
        self.ensure_active("add a strategy")?;

        let already_present = strategy.export_keys().all(|key| {
            self.get_strategy_collection(key, false)
                .map_or(false, |collection| collection.contains(&strategy))
        });
        if already_present {
            return Ok(());
        }

        let mut chain = self.self_and_ancestors();
        chain.reverse();
        for scope in &chain {
            let inspectors = scope.inner.strategy_inspectors.read().clone();
            for inspector in inspectors {
                inspector.inspect(self, &strategy);
            }
        }
        for scope in &chain {
            let inspectors = scope.inner.value_inspectors.read().clone();
            for inspector in inspectors {
                let overrides = inspector.provide(self, &strategy);
                if !overrides.is_empty() {
                    strategy.add_overrides(overrides);
                }
            }
        }

        for key in strategy.export_keys() {
            if let Some(collection) = self.get_strategy_collection(key, true) {
                collection.add(strategy.clone());
            }
        }

        debug!(
            strategy = %strategy.id(),
            activation = strategy.activation_kind(),
            activation_type = %strategy.activation_type(),
            scope = %self.inner.name,
            "Strategy added"
        );
        Ok(())
    }

    /// Remove by reference from every export collection; false if absent.
    pub fn remove_strategy(&self, strategy: &Arc<ExportStrategy>) -> Result<bool, LocateError> {
        self.ensure_active("remove a strategy")?;
        let mut removed = false;
        for key in strategy.export_keys() {
            if let Some(collection) = self.get_strategy_collection(key, false) {
                removed |= collection.remove(strategy);
            }
        }
        if removed {
            self.inner.instances.remove(&strategy.id());
            debug!(strategy = %strategy.id(), scope = %self.inner.name, "Strategy removed");
        }
        Ok(removed)
    }

    /// Run a configuration callback against this scope.
    pub fn configure<F>(&self, configure: F) -> Result<(), LocateError>
    where
        F: FnOnce(&Scope) -> Result<(), LocateError>,
    {
        self.ensure_active("configure")?;
        configure(self)
    }

    pub fn get_strategy_collection(&self, key: &CapabilityKey, create: bool) -> Option<Arc<StrategyCollection>> {
        if let Some(existing) = self.inner.collections.get(key) {
            return Some(existing.value().clone());
        }
        if !create {
            return None;
        }
        let collection = self
            .inner
            .collections
            .entry(key.clone())
            .or_insert_with(|| Arc::new(StrategyCollection::new(key.clone())))
            .value()
            .clone();
        Some(collection)
    }

    /// Best local strategy for `key` as a top-level request from this scope would see it.
    pub fn get_strategy(&self, key: &CapabilityKey) -> Option<Arc<ExportStrategy>> {
        let collection = self.get_strategy_collection(key, false)?;
        let ctx = self.new_context(key.clone(), LocateOptions::default());
        collection.get_strategy(self, &ctx, None)
    }

    pub fn get_strategies(&self, key: &CapabilityKey) -> Vec<Arc<ExportStrategy>> {
        match self.get_strategy_collection(key, false) {
            Some(collection) => {
                let ctx = self.new_context(key.clone(), LocateOptions::default());
                collection.get_strategies(self, &ctx, None)
            }
            None => Vec::new(),
        }
    }

    /// Every local strategy, each once, ordered by id.
    pub fn get_all_strategies(&self) -> Vec<Arc<ExportStrategy>> {
        let collections: Vec<_> = self
            .inner
            .collections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut seen = HashSet::new();
        let mut all: Vec<_> = collections
            .iter()
            .flat_map(|collection| collection.strategies())
            .filter(|strategy| seen.insert(strategy.id()))
            .collect();
        all.sort_by_key(|strategy| strategy.id());
        all
    }

    // ---- Extension points ----

    pub fn add_secondary_locator(&self, locator: impl SecondaryExportLocator + 'static) -> Result<(), LocateError> {
        self.ensure_active("add a secondary locator")?;
        self.inner.secondary_locators.write().push(Arc::new(locator));
        Ok(())
    }

    pub fn add_missing_export_strategy_provider(
        &self,
        provider: impl MissingExportStrategyProvider + 'static,
    ) -> Result<(), LocateError> {
        self.ensure_active("add a missing-export provider")?;
        self.inner.missing_export_providers.write().push(Arc::new(provider));
        Ok(())
    }

    pub fn add_strategy_inspector(&self, inspector: impl StrategyInspector + 'static) -> Result<(), LocateError> {
        self.ensure_active("add a strategy inspector")?;
        self.inner.strategy_inspectors.write().push(Arc::new(inspector));
        Ok(())
    }

    pub fn add_injection_value_provider_inspector(
        &self,
        inspector: impl InjectionValueProviderInspector + 'static,
    ) -> Result<(), LocateError> {
        self.ensure_active("add an injection value provider inspector")?;
        self.inner.value_inspectors.write().push(Arc::new(inspector));
        Ok(())
    }

    fn secondary_locators(&self) -> Vec<Arc<dyn SecondaryExportLocator>> {
        self.inner.secondary_locators.read().clone()
    }

    pub(crate) fn missing_export_providers(&self) -> Vec<Arc<dyn MissingExportStrategyProvider>> {
        self.inner.missing_export_providers.read().clone()
    }

    // ---- Children ----

    /// New child named `child`. Short-lived children (one per request, say)
    /// must be disposed when done, or they accumulate in this scope.
    pub fn create_child_scope(&self) -> Result<Scope, LocateError> {
        self.create_child_scope_with(ChildScopeOptions::default())
    }

    pub fn create_child_scope_with(&self, options: ChildScopeOptions) -> Result<Scope, LocateError> {
        self.ensure_active("create a child scope")?;

        let name = options.name.unwrap_or_else(|| "child".to_string());
        let child = Scope::new(self.inner.manager.clone(), name, Some(self));

        if let Some(provider) = options.disposal_scope_provider {
            if let Some(target) = provider.disposal_scope(&child) {
                let _ = child.inner.disposal_target.set(target.id());
            }
        }

        {
            let mut children = self.inner.children.lock();
            // Checked under the lock so a concurrent dispose cannot miss the child
            if self.is_disposed() {
                drop(children);
                child.inner.disposed.store(true, Ordering::Release);
                self.inner.manager.unregister(child.id());
                return Err(self.disposed_error("create a child scope"));
            }
            children.push(child.clone());
        }

        debug!(scope = %child.inner.name, id = %child.inner.id, parent = %self.inner.name, "Child scope created");

        if let Some(registration) = options.registration {
            if let Err(err) = registration(&child) {
                child.dispose();
                return Err(err);
            }
        }
        Ok(child)
    }

    // ---- Disposal ----

    /// Dispose `value` when this scope is disposed.
    pub fn add_disposable<T: Disposable + 'static>(&self, value: Arc<T>) -> Result<(), LocateError> {
        self.ensure_active("add a disposable")?;
        let instance: Instance = value.clone();
        let disposable: Arc<dyn Disposable> = value;
        match self.push_disposal(DisposalEntry::new(instance, Some(disposable), None)) {
            None => Ok(()),
            Some(_) => Err(self.disposed_error("add a disposable")),
        }
    }

    /// Run `cleanup` with `value` when this scope is disposed.
    pub fn add_disposable_with_cleanup<T, F>(&self, value: Arc<T>, cleanup: F) -> Result<(), LocateError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        self.ensure_active("add a disposable")?;
        let instance: Instance = value;
        let cleanup: CleanupFn = Box::new(move |instance: &Instance| {
            if let Some(value) = instance.downcast_ref::<T>() {
                cleanup(value);
            }
        });
        match self.push_disposal(DisposalEntry::new(instance, None, Some(cleanup))) {
            None => Ok(()),
            Some(_) => Err(self.disposed_error("add a disposable")),
        }
    }

    /// Forget `value` so disposal skips it. False if it was not tracked here.
    pub fn remove_disposable<T: ?Sized>(&self, value: &Arc<T>) -> bool {
        let identity = Arc::as_ptr(value) as *const () as usize;
        self.inner.disposables.lock().remove(identity)
    }

    pub fn disposable_count(&self) -> usize {
        self.inner.disposables.lock().len()
    }

    /// Push under the disposal lock. `dispose` marks the scope before it
    /// drains under the same lock, so an entry is either drained or handed back.
    fn push_disposal(&self, entry: DisposalEntry) -> Option<DisposalEntry> {
        let mut disposables = self.inner.disposables.lock();
        if self.is_disposed() {
            return Some(entry);
        }
        disposables.push(entry);
        None
    }

    /// Scope whose disposal set receives instances owned by this scope.
    pub(crate) fn disposal_target(&self) -> Scope {
        self.inner
            .disposal_target
            .get()
            .and_then(|id| self.inner.manager.lookup(*id))
            .unwrap_or_else(|| self.clone())
    }

    /// Track an instance owned by this scope. If the receiving scope is
    /// already disposed the entry is released immediately.
    pub(crate) fn track_entry(&self, entry: DisposalEntry) -> Result<(), LocateError> {
        self.disposal_target().adopt(entry)
    }

    fn adopt(&self, entry: DisposalEntry) -> Result<(), LocateError> {
        trace!(scope = %self.inner.name, "Tracking instance for disposal");
        match self.push_disposal(entry) {
            None => Ok(()),
            Some(rejected) => {
                rejected.release();
                Err(self.disposed_error("track an instance"))
            }
        }
    }

    /// Move staged entries into their disposal sets, in staging order.
    pub(crate) fn commit_staged(staged: Vec<StagedDisposal>) -> Result<(), LocateError> {
        let mut first_error = None;
        for StagedDisposal { target, entry } in staged {
            if let Err(err) = target.adopt(entry) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Cached instance of `strategy` in this scope, created at most once.
    pub(crate) fn cached_instance(
        &self,
        strategy: StrategyId,
        create: &mut dyn FnMut() -> Result<Instance, LocateError>,
    ) -> Result<Instance, LocateError> {
        self.ensure_active("cache an instance")?;
        // Release the map guard before running the factory
        let cell = self
            .inner
            .instances
            .entry(strategy)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();
        cell.get_or_try_init(|| create()).map(Instance::clone)
    }

    /// Dispose this scope: local disposables newest first, then children in
    /// creation order. Later calls do nothing.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let timer = OperationTimer::new("scope_dispose")
            .with_metadata("scope", &self.inner.name)
            .with_metadata("id", &self.inner.id.to_string());

        let entries = self.inner.disposables.lock().drain_lifo();
        let released = release_all(entries);

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in &children {
            child.dispose();
        }

        if let Ok(Some(parent)) = self.parent() {
            parent.inner.children.lock().retain(|child| child.id() != self.id());
        }

        self.inner.instances.clear();
        self.inner.collections.clear();
        self.inner.manager.unregister(self.inner.id);

        debug!(
            scope = %self.inner.name,
            released,
            children = children.len(),
            "Scope disposed"
        );
        timer.finish();
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::container::ScopeManager;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct Foo(&'static str);

    struct Tracked {
        name: &'static str,
        log: Arc<StdMutex<Vec<&'static str>>>,
    }

    impl Disposable for Tracked {
        fn dispose(&self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[test]
    fn test_child_shadows_parent_without_mutating_it() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(ExportStrategy::instance(Foo("root")).build()).unwrap();

        let child = root.create_child_scope().unwrap();
        child
            .add_strategy(ExportStrategy::instance(Foo("child")).priority(-5).build())
            .unwrap();

        assert_eq!(child.locate::<Foo>().unwrap().unwrap().0, "child");
        assert_eq!(root.locate::<Foo>().unwrap().unwrap().0, "root");
        assert_eq!(root.get_strategies(&CapabilityKey::of_type::<Foo>()).len(), 1);
    }

    #[test]
    fn test_keyed_locate() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(ExportStrategy::instance(Foo("plain")).build()).unwrap();
        root.add_strategy(ExportStrategy::instance(Foo("blue")).keyed("blue").build())
            .unwrap();

        let blue = root
            .locate_with::<Foo>(LocateOptions::new().with_key("blue"))
            .unwrap()
            .unwrap();
        assert_eq!(blue.0, "blue");
        assert_eq!(root.locate::<Foo>().unwrap().unwrap().0, "plain");
        assert!(root
            .locate_with::<Foo>(LocateOptions::new().with_key("red"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_locate_all_spans_chain() {
        let manager = ScopeManager::new();
        let root = manager.root();
        root.add_strategy(ExportStrategy::instance(Foo("a")).priority(1).build()).unwrap();
        root.add_strategy(ExportStrategy::instance(Foo("b")).priority(2).build()).unwrap();
        let child = root.create_child_scope().unwrap();
        child.add_strategy(ExportStrategy::instance(Foo("c")).build()).unwrap();

        let names: Vec<_> = child.locate_all::<Foo>().unwrap().iter().map(|f| f.0).collect();
        assert_eq!(names, vec!["c", "b", "a"]);

        let sorted: Vec<_> = child
            .locate_all_sorted::<Foo, _>(|a, b| a.0.cmp(b.0))
            .unwrap()
            .iter()
            .map(|f| f.0)
            .collect();
        assert_eq!(sorted, vec!["a", "b", "c"]);

        assert!(child.locate_all::<String>().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_is_lifo_and_idempotent() {
        let manager = ScopeManager::new();
        let scope = manager.root().create_child_scope().unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));

        scope
            .add_disposable(Arc::new(Tracked { name: "first", log: log.clone() }))
            .unwrap();
        scope
            .add_disposable(Arc::new(Tracked { name: "second", log: log.clone() }))
            .unwrap();
        let skipped = Arc::new(Tracked { name: "skipped", log: log.clone() });
        scope.add_disposable(skipped.clone()).unwrap();
        assert!(scope.remove_disposable(&skipped));

        scope.dispose();
        scope.dispose();

        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
        assert_eq!(manager.root().child_count(), 0);
    }

    #[test]
    fn test_disposed_scope_rejects_operations() {
        let manager = ScopeManager::new();
        let scope = manager.root().create_child_scope_with(ChildScopeOptions::named("gone")).unwrap();
        scope.dispose();

        let err = scope.locate::<Foo>().unwrap_err();
        assert!(matches!(err, LocateError::ScopeDisposed { operation: "locate", .. }));
        assert!(scope
            .add_strategy(ExportStrategy::instance(Foo("late")).build())
            .is_err());
        assert!(scope.create_child_scope().is_err());
    }

    #[test]
    fn test_children_disposed_after_local_disposables() {
        let manager = ScopeManager::new();
        let parent = manager.root().create_child_scope().unwrap();
        let child = parent.create_child_scope().unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));

        child
            .add_disposable(Arc::new(Tracked { name: "child", log: log.clone() }))
            .unwrap();
        parent
            .add_disposable(Arc::new(Tracked { name: "parent", log: log.clone() }))
            .unwrap();

        parent.dispose();
        assert!(child.is_disposed());
        assert_eq!(*log.lock().unwrap(), vec!["parent", "child"]);
    }

    #[test]
    fn test_registration_callback_and_disposal_redirect() {
        let manager = ScopeManager::new();
        let root = manager.root().clone();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let factory_log = log.clone();

        let redirect_to = root.clone();
        let options = ChildScopeOptions::named("worker")
            .with_disposal_scope_provider(move |_: &Scope| Some(redirect_to.clone()))
            .with_registration(move |scope: &Scope| {
                scope.add_strategy(
                    ExportStrategy::factory(move |_| {
                        Ok(Tracked { name: "worker", log: factory_log.clone() })
                    })
                    .scoped()
                    .disposable()
                    .build(),
                )
            });
        let worker = root.create_child_scope_with(options).unwrap();

        worker.locate::<Tracked>().unwrap().unwrap();
        worker.dispose();
        assert!(log.lock().unwrap().is_empty());

        root.dispose();
        assert_eq!(*log.lock().unwrap(), vec!["worker"]);
    }

    #[test]
    fn test_throw_exceptions_reports_scope_chain() {
        let config = ContainerConfig::default().with_throw_exceptions(true);
        let manager = ScopeManager::with_config(config);
        let child = manager.root().create_child_scope_with(ChildScopeOptions::named("request")).unwrap();

        match child.locate::<Foo>().unwrap_err() {
            LocateError::NotLocated { scope_chain, .. } => {
                assert_eq!(scope_chain, vec!["request".to_string(), "root".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(child.try_locate::<Foo>().unwrap().is_none());
    }

    #[test]
    fn test_disposal_set_rejects_entries_after_dispose() {
        let manager = ScopeManager::new();
        let scope = manager.root().create_child_scope().unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));
        scope.dispose();

        let late = Arc::new(Tracked { name: "late", log: log.clone() });
        assert!(matches!(
            scope.add_disposable(late.clone()),
            Err(LocateError::ScopeDisposed { .. })
        ));
        assert_eq!(scope.disposable_count(), 0);

        let entry = DisposalEntry::new(late.clone(), Some(late as Arc<dyn Disposable>), None);
        assert!(scope.track_entry(entry).is_err());
        // A rejected tracked instance is released, never left behind
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_disposables_added_during_dispose_are_released() {
        for _ in 0..20 {
            let manager = ScopeManager::new();
            let scope = manager.root().create_child_scope().unwrap();
            let log = Arc::new(StdMutex::new(Vec::new()));

            let adders: Vec<_> = (0..4)
                .map(|_| {
                    let scope = scope.clone();
                    let log = log.clone();
                    std::thread::spawn(move || {
                        (0..50)
                            .filter(|_| {
                                let resource = Arc::new(Tracked { name: "resource", log: log.clone() });
                                scope.add_disposable(resource).is_ok()
                            })
                            .count()
                    })
                })
                .collect();
            scope.dispose();

            let accepted: usize = adders.into_iter().map(|adder| adder.join().unwrap()).sum();
            assert_eq!(log.lock().unwrap().len(), accepted);
            assert_eq!(scope.disposable_count(), 0);
        }
    }
}
