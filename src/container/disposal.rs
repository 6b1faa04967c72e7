//! Scope-owned resources released at scope disposal.

use std::fmt;
use std::sync::Arc;

use super::scope::Scope;
use super::Instance;

/// A resource with explicit teardown.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Cleanup run with the instance before it is released.
pub type CleanupFn = Box<dyn FnOnce(&Instance) + Send>;

/// Identity of a tracked instance: the address of its shared allocation.
pub(crate) fn identity_of(instance: &Instance) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

pub(crate) struct DisposalEntry {
    instance: Instance,
    disposable: Option<Arc<dyn Disposable>>,
    cleanup: Option<CleanupFn>,
}

impl DisposalEntry {
    pub(crate) fn new(
        instance: Instance,
        disposable: Option<Arc<dyn Disposable>>,
        cleanup: Option<CleanupFn>,
    ) -> Self {
        Self {
            instance,
            disposable,
            cleanup,
        }
    }

    fn identity(&self) -> usize {
        identity_of(&self.instance)
    }

    /// Cleanup callback first, then the disposable itself.
    pub(crate) fn release(self) {
        if let Some(cleanup) = self.cleanup {
            cleanup(&self.instance);
        }
        if let Some(disposable) = self.disposable {
            disposable.dispose();
        }
    }
}

/// Disposal set of one scope, drained in reverse registration order.
#[derive(Default)]
pub(crate) struct DisposalSet {
    entries: Vec<DisposalEntry>,
}

impl DisposalSet {
    pub(crate) fn push(&mut self, entry: DisposalEntry) {
        self.entries.push(entry);
    }

    /// Drop the most recent entry for `identity` without running it.
    pub(crate) fn remove(&mut self, identity: usize) -> bool {
        match self.entries.iter().rposition(|entry| entry.identity() == identity) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take every entry out, newest first. Callers release them outside
    /// any lock so cleanup may touch other scopes.
    pub(crate) fn drain_lifo(&mut self) -> Vec<DisposalEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        drained.reverse();
        drained
    }
}

/// Release drained entries in order.
pub(crate) fn release_all(entries: Vec<DisposalEntry>) -> usize {
    let count = entries.len();
    for entry in entries {
        entry.release();
    }
    count
}

impl fmt::Debug for DisposalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalSet")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Chooses the scope whose disposal set receives instances owned by a new
/// child scope.
pub trait DisposalScopeProvider: Send + Sync {
    fn disposal_scope(&self, scope: &Scope) -> Option<Scope>;
}

impl<F> DisposalScopeProvider for F
where
    F: Fn(&Scope) -> Option<Scope> + Send + Sync,
{
    fn disposal_scope(&self, scope: &Scope) -> Option<Scope> {
        self(scope)
    }
}
