//! Scope manager: owns the root, assigns identifiers and tracks live scopes.

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::catalog::{AutoRegistrar, ConstructibleCatalog};
use super::key::CapabilityKey;
use super::missing_export::UnknownExportListener;
use super::scope::{Scope, ScopeId, ScopeInner};
use crate::config::ContainerConfig;
use crate::errors::LocateError;

/// State shared by every scope of one container. Holds scopes only weakly.
pub(crate) struct ManagerShared {
    scopes: DashMap<ScopeId, Weak<ScopeInner>>,
    config: RwLock<Arc<ContainerConfig>>,
    listeners: RwLock<Vec<Arc<dyn UnknownExportListener>>>,
    registrar: RwLock<Arc<dyn AutoRegistrar>>,
    catalog: Arc<ConstructibleCatalog>,
    fallback_locks: DashMap<CapabilityKey, Arc<ReentrantMutex<()>>>,
}

impl ManagerShared {
    fn new(config: ContainerConfig) -> Self {
        let catalog = Arc::new(ConstructibleCatalog::new());
        let registrar: Arc<dyn AutoRegistrar> = catalog.clone();
        Self {
            scopes: DashMap::new(),
            config: RwLock::new(Arc::new(config)),
            listeners: RwLock::new(Vec::new()),
            registrar: RwLock::new(registrar),
            catalog,
            fallback_locks: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, scope: &Scope) {
        self.scopes.insert(scope.id(), scope.downgrade());
    }

    pub(crate) fn unregister(&self, id: ScopeId) {
        self.scopes.remove(&id);
    }

    pub(crate) fn lookup(&self, id: ScopeId) -> Option<Scope> {
        let weak = self.scopes.get(&id).map(|entry| entry.value().clone())?;
        weak.upgrade().map(Scope::from_inner)
    }

    /// Snapshot taken by each top-level call.
    pub(crate) fn config(&self) -> Arc<ContainerConfig> {
        self.config.read().clone()
    }

    pub(crate) fn auto_registrar(&self) -> Arc<dyn AutoRegistrar> {
        self.registrar.read().clone()
    }

    pub(crate) fn unknown_export_listeners(&self) -> Vec<Arc<dyn UnknownExportListener>> {
        self.listeners.read().clone()
    }

    /// Serializes the missing-export fallback for one key. Reentrant so a
    /// fallback may resolve the same key again on its own thread.
    pub(crate) fn fallback_lock(&self, key: &CapabilityKey) -> Arc<ReentrantMutex<()>> {
        self.fallback_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .value()
            .clone()
    }

    fn live_scopes(&self) -> Vec<Scope> {
        let weaks: Vec<_> = self
            .scopes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        weaks
            .into_iter()
            .filter_map(|weak| weak.upgrade())
            .map(Scope::from_inner)
            .filter(|scope| !scope.is_disposed())
            .collect()
    }
}

/// Diagnostics snapshot of one live scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeInfo {
    pub id: ScopeId,
    pub name: String,
    pub parent: Option<ScopeId>,
    pub depth: usize,
    pub children: usize,
    pub strategies: usize,
    pub disposables: usize,
}

/// Entry point of a container: creates the root scope and mediates
/// configuration requests addressed to scopes by name.
pub struct ScopeManager {
    shared: Arc<ManagerShared>,
    root: Scope,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let root_name = config.root_scope_name.clone();
        let shared = Arc::new(ManagerShared::new(config));
        let root = Scope::new(shared.clone(), root_name, None);
        info!(root = %root.id(), "Scope manager created");
        Self { shared, root }
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }

    pub fn config(&self) -> Arc<ContainerConfig> {
        self.shared.config()
    }

    /// Replace the configuration. Calls already in flight keep their snapshot.
    pub fn update_config(&self, config: ContainerConfig) {
        *self.shared.config.write() = Arc::new(config);
        debug!("Container configuration updated");
    }

    pub fn find_scope(&self, id: ScopeId) -> Option<Scope> {
        self.shared.lookup(id).filter(|scope| !scope.is_disposed())
    }

    pub fn scopes_named(&self, name: &str) -> Vec<Scope> {
        self.shared
            .live_scopes()
            .into_iter()
            .filter(|scope| scope.name() == name)
            .collect()
    }

    /// Apply `configure` to every live scope named `name`; returns how many
    /// scopes were configured. The first failure stops the walk.
    pub fn configure<F>(&self, name: &str, configure: F) -> Result<usize, LocateError>
    where
        F: Fn(&Scope) -> Result<(), LocateError>,
    {
        let mut scopes = self.scopes_named(name);
        scopes.sort_by_key(|scope| scope.depth());

        let mut configured = 0;
        for scope in &scopes {
            scope.configure(|scope| configure(scope))?;
            configured += 1;
        }
        debug!(name, configured, "Configured scopes by name");
        Ok(configured)
    }

    pub fn add_unknown_export_listener(&self, listener: impl UnknownExportListener + 'static) {
        self.shared.listeners.write().push(Arc::new(listener));
    }

    /// Replace the collaborator used when `auto_register_unknown` is enabled.
    pub fn set_auto_registrar(&self, registrar: impl AutoRegistrar + 'static) {
        *self.shared.registrar.write() = Arc::new(registrar);
    }

    /// Catalog backing the default auto-registrar.
    pub fn catalog(&self) -> &ConstructibleCatalog {
        &self.shared.catalog
    }

    pub fn scope_info(&self) -> Vec<ScopeInfo> {
        let mut info: Vec<_> = self
            .shared
            .live_scopes()
            .into_iter()
            .map(|scope| ScopeInfo {
                id: scope.id(),
                name: scope.name().to_string(),
                parent: scope.parent_id(),
                depth: scope.depth(),
                children: scope.child_count(),
                strategies: scope.get_all_strategies().len(),
                disposables: scope.disposable_count(),
            })
            .collect();
        info.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.name.cmp(&b.name)));
        info
    }

    pub fn live_scope_count(&self) -> usize {
        self.shared.live_scopes().len()
    }

    /// Dispose the root and with it every scope of this container.
    pub fn dispose(&self) {
        self.root.dispose();
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeManager")
            .field("root", &self.root)
            .field("live_scopes", &self.shared.scopes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ChildScopeOptions, ExportStrategy};

    #[test]
    fn test_scope_ids_are_unique_and_findable() {
        let manager = ScopeManager::new();
        let a = manager.root().create_child_scope().unwrap();
        let b = manager.root().create_child_scope().unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(manager.find_scope(a.id()), Some(a.clone()));
        assert_eq!(manager.live_scope_count(), 3);

        a.dispose();
        assert!(manager.find_scope(a.id()).is_none());
        assert_eq!(manager.live_scope_count(), 2);
    }

    #[test]
    fn test_configure_by_name() {
        let manager = ScopeManager::new();
        let first = manager
            .root()
            .create_child_scope_with(ChildScopeOptions::named("tenant"))
            .unwrap();
        let second = first
            .create_child_scope_with(ChildScopeOptions::named("tenant"))
            .unwrap();
        manager
            .root()
            .create_child_scope_with(ChildScopeOptions::named("other"))
            .unwrap();

        let count = manager
            .configure("tenant", |scope| {
                scope.add_strategy(ExportStrategy::instance(scope.depth()).build())
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(*first.locate::<usize>().unwrap().unwrap(), 1);
        assert_eq!(*second.locate::<usize>().unwrap().unwrap(), 2);
        assert_eq!(manager.configure("missing", |_| Ok(())).unwrap(), 0);
    }

    #[test]
    fn test_scope_info_snapshot() {
        let manager = ScopeManager::new();
        let child = manager
            .root()
            .create_child_scope_with(ChildScopeOptions::named("request"))
            .unwrap();
        child.add_strategy(ExportStrategy::instance(1u8).build()).unwrap();

        let info = manager.scope_info();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "root");
        assert_eq!(info[0].children, 1);
        assert_eq!(info[1].parent, Some(manager.root().id()));
        assert_eq!(info[1].strategies, 1);

        let json = serde_json::to_value(&info[1]).unwrap();
        assert_eq!(json["name"], "request");
    }

    #[test]
    fn test_update_config_applies_to_new_calls() {
        let manager = ScopeManager::new();
        assert!(manager.root().locate::<String>().unwrap().is_none());

        manager.update_config(ContainerConfig::default().with_throw_exceptions(true));
        assert!(manager.root().locate::<String>().unwrap_err().is_not_located());
    }

    #[test]
    fn test_dispose_cascades_from_root() {
        let manager = ScopeManager::new();
        let child = manager.root().create_child_scope().unwrap();
        let grandchild = child.create_child_scope().unwrap();

        manager.dispose();
        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
        assert_eq!(manager.live_scope_count(), 0);
    }
}
