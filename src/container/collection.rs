//! The set of strategies registered under one capability key.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::{ExportFilter, InjectionContext};
use super::key::CapabilityKey;
use super::scope::Scope;
use super::strategy::ExportStrategy;

#[derive(Clone)]
struct Member {
    strategy: Arc<ExportStrategy>,
    sequence: u64,
}

/// Copy-on-write strategy set. Writers swap in a new snapshot under the
/// lock; readers work on one snapshot and never see a partial update.
pub struct StrategyCollection {
    key: CapabilityKey,
    members: RwLock<Arc<Vec<Member>>>,
    next_sequence: AtomicU64,
}

impl StrategyCollection {
    pub fn new(key: CapabilityKey) -> Self {
        Self {
            key,
            members: RwLock::new(Arc::new(Vec::new())),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &CapabilityKey {
        &self.key
    }

    /// Insert `strategy`; returns false if this exact strategy is already present.
    pub fn add(&self, strategy: Arc<ExportStrategy>) -> bool {
        let mut guard = self.members.write();
        if guard.iter().any(|member| Arc::ptr_eq(&member.strategy, &strategy)) {
            return false;
        }

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Member {
            strategy,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        });
        *guard = Arc::new(next);
        true
    }

    /// Remove by reference; false if absent.
    pub fn remove(&self, strategy: &Arc<ExportStrategy>) -> bool {
        let mut guard = self.members.write();
        if !guard.iter().any(|member| Arc::ptr_eq(&member.strategy, strategy)) {
            return false;
        }

        let next: Vec<Member> = guard
            .iter()
            .filter(|member| !Arc::ptr_eq(&member.strategy, strategy))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn contains(&self, strategy: &Arc<ExportStrategy>) -> bool {
        self.snapshot()
            .iter()
            .any(|member| Arc::ptr_eq(&member.strategy, strategy))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Every member in registration order, eligible or not.
    pub fn strategies(&self) -> Vec<Arc<ExportStrategy>> {
        self.snapshot()
            .iter()
            .map(|member| member.strategy.clone())
            .collect()
    }

    /// Best eligible strategy: highest priority, then most recently added.
    pub fn get_strategy(
        &self,
        scope: &Scope,
        ctx: &InjectionContext,
        filter: Option<&ExportFilter>,
    ) -> Option<Arc<ExportStrategy>> {
        let snapshot = self.snapshot();
        snapshot
            .iter()
            .filter(|member| is_eligible(&member.strategy, scope, ctx, filter))
            .map(|member| ((member.strategy.priority(), member.sequence), member))
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, member)| member.strategy.clone())
    }

    /// All eligible strategies, best first. Recomputed on every call.
    pub fn get_strategies(
        &self,
        scope: &Scope,
        ctx: &InjectionContext,
        filter: Option<&ExportFilter>,
    ) -> Vec<Arc<ExportStrategy>> {
        let snapshot = self.snapshot();
        let mut ranked: Vec<_> = snapshot
            .iter()
            .filter(|member| is_eligible(&member.strategy, scope, ctx, filter))
            .map(|member| ((member.strategy.priority(), member.sequence), member.strategy.clone()))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, strategy)| strategy).collect()
    }

    fn snapshot(&self) -> Arc<Vec<Member>> {
        self.members.read().clone()
    }
}

fn is_eligible(
    strategy: &ExportStrategy,
    scope: &Scope,
    ctx: &InjectionContext,
    filter: Option<&ExportFilter>,
) -> bool {
    strategy.meets_conditions(scope, ctx) && filter.map_or(true, |filter| filter.allows(strategy))
}

impl std::fmt::Debug for StrategyCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCollection")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish()
    }
}
