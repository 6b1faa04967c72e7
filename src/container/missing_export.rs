//! Fallback layers for requests nothing in the scope chain can serve.
//!
//! Resolution of an unresolved request moves through these states:
//!
//! ```text
//! NoStrategy -> ProviderSweep -> Synthesized | Unresolved
//!            -> AutoRegister  -> Synthesized | Unresolved
//!            -> EventFallback -> Final
//! ```
//!
//! Errors raised by providers, registrars or listeners propagate unchanged.

use std::sync::Arc;
use tracing::{debug, trace};

use super::context::InjectionContext;
use super::key::{CapabilityKey, TypeKey};
use super::scope::Scope;
use super::strategy::ExportStrategy;
use super::Instance;
use crate::config::FallbackPolicy;
use crate::errors::LocateError;

/// Synthesizes strategies for capability keys with no registration.
pub trait MissingExportStrategyProvider: Send + Sync {
    /// `scope` owns this provider; `ctx` describes the unresolved request.
    fn provide(
        &self,
        scope: &Scope,
        ctx: &InjectionContext,
        key: &CapabilityKey,
    ) -> Result<Vec<Arc<ExportStrategy>>, LocateError>;
}

impl<F> MissingExportStrategyProvider for F
where
    F: Fn(&Scope, &InjectionContext, &CapabilityKey) -> Result<Vec<Arc<ExportStrategy>>, LocateError>
        + Send
        + Sync,
{
    fn provide(
        &self,
        scope: &Scope,
        ctx: &InjectionContext,
        key: &CapabilityKey,
    ) -> Result<Vec<Arc<ExportStrategy>>, LocateError> {
        self(scope, ctx, key)
    }
}

/// Arguments of the unknown-export notification.
pub struct UnknownExport<'a> {
    pub scope: &'a Scope,
    pub context: &'a InjectionContext,
    pub key: &'a CapabilityKey,
}

impl UnknownExport<'_> {
    pub fn requested_name(&self) -> Option<&str> {
        self.key.name()
    }

    pub fn requested_type(&self) -> Option<TypeKey> {
        self.key.type_key()
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.key.key()
    }
}

/// Last-resort notification. A returned value becomes the resolution result.
pub trait UnknownExportListener: Send + Sync {
    fn unknown_export(&self, export: &UnknownExport<'_>) -> Result<Option<Instance>, LocateError>;
}

impl<F> UnknownExportListener for F
where
    F: Fn(&UnknownExport<'_>) -> Result<Option<Instance>, LocateError> + Send + Sync,
{
    fn unknown_export(&self, export: &UnknownExport<'_>) -> Result<Option<Instance>, LocateError> {
        self(export)
    }
}

enum SweepState {
    Unresolved,
    Synthesized(Instance),
}

impl SweepState {
    fn into_option(self) -> Option<Instance> {
        match self {
            SweepState::Unresolved => None,
            SweepState::Synthesized(instance) => Some(instance),
        }
    }
}

/// Run every fallback layer for the request in `ctx`, made from `requesting`.
pub(crate) fn resolve_missing(
    requesting: &Scope,
    ctx: &mut InjectionContext,
) -> Result<Option<Instance>, LocateError> {
    let key = ctx.request().key().clone();
    let policy = ctx.config().fallback_policy;

    let lock = requesting.manager().fallback_lock(&key);
    let _serialized = lock.lock();
    // A concurrent caller may have registered a strategy while this one waited
    if let Some(instance) = requesting.locate_in_chain(ctx)? {
        return Ok(Some(instance));
    }

    if let Some(instance) = provider_sweep(requesting, ctx, &key, policy)? {
        return Ok(Some(instance));
    }

    if ctx.config().auto_register_unknown {
        if let Some(instance) = auto_register(requesting, ctx, &key)? {
            return Ok(Some(instance));
        }
    }

    notify_listeners(requesting, ctx, &key, policy)
}

/// Providers of every scope from the root down to `requesting` take part,
/// each list in registration order. Under `FirstMatch` the sweep ends at the
/// first provider whose registrations resolve the request, so later lookups
/// see the same winner. Under `LastMatch` every provider runs once and the
/// strategy in place after the last one is what this and later lookups get.
fn provider_sweep(
    requesting: &Scope,
    ctx: &mut InjectionContext,
    key: &CapabilityKey,
    policy: FallbackPolicy,
) -> Result<Option<Instance>, LocateError> {
    let mut state = SweepState::Unresolved;
    let mut chain = requesting.self_and_ancestors();
    chain.reverse();

    'sweep: for scope in &chain {
        for provider in scope.missing_export_providers() {
            let produced = provider.provide(scope, ctx, key)?;
            if produced.is_empty() {
                continue;
            }

            trace!(key = %key, scope = %scope.name(), count = produced.len(), "Provider synthesized strategies");
            for strategy in produced {
                scope.add_strategy(strategy)?;
            }

            if let Some(instance) = requesting.locate_in_chain(ctx)? {
                state = SweepState::Synthesized(instance);
                if policy == FallbackPolicy::FirstMatch {
                    break 'sweep;
                }
            }
        }
    }

    if matches!(state, SweepState::Synthesized(_)) {
        debug!(key = %key, scope = %requesting.name(), "Resolved through missing-export providers");
    }
    Ok(state.into_option())
}

/// Register a synthesized strategy at the root and retry once.
fn auto_register(
    requesting: &Scope,
    ctx: &mut InjectionContext,
    key: &CapabilityKey,
) -> Result<Option<Instance>, LocateError> {
    let Some(strategy) = requesting.manager().auto_registrar().synthesize(key) else {
        return Ok(None);
    };

    let root = requesting.root()?;
    root.add_strategy(strategy)?;
    debug!(key = %key, "Auto-registered unknown export at root");
    requesting.locate_in_chain(ctx)
}

fn notify_listeners(
    requesting: &Scope,
    ctx: &InjectionContext,
    key: &CapabilityKey,
    policy: FallbackPolicy,
) -> Result<Option<Instance>, LocateError> {
    let listeners = requesting.manager().unknown_export_listeners();
    if listeners.is_empty() {
        return Ok(None);
    }

    let export = UnknownExport {
        scope: requesting,
        context: ctx,
        key,
    };
    let mut result = None;
    for listener in listeners {
        if let Some(instance) = listener.unknown_export(&export)? {
            result = Some(instance);
            if policy == FallbackPolicy::FirstMatch {
                break;
            }
        }
    }

    if result.is_some() {
        debug!(key = %key, "Unknown export supplied by listener");
    }
    Ok(result)
}
