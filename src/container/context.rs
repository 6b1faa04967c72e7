//! Per-call resolution state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::disposal::DisposalEntry;
use super::key::{CapabilityKey, TypeKey};
use super::scope::Scope;
use super::strategy::{ExportStrategy, StrategyId};
use super::Instance;
use crate::config::ContainerConfig;
use crate::errors::LocateError;

/// Caller-supplied predicate over candidate strategies.
#[derive(Clone)]
pub struct ExportFilter(Arc<dyn Fn(&ExportStrategy) -> bool + Send + Sync>);

impl ExportFilter {
    pub fn new<F>(filter: F) -> Self
    where
        F: Fn(&ExportStrategy) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(filter))
    }

    pub fn allows(&self, strategy: &ExportStrategy) -> bool {
        (self.0)(strategy)
    }
}

impl fmt::Debug for ExportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExportFilter(..)")
    }
}

/// Optional parameters of a top-level locate call.
#[derive(Clone, Default)]
pub struct LocateOptions {
    pub key: Option<String>,
    pub filter: Option<ExportFilter>,
    pub extra_data: HashMap<String, Instance>,
}

impl LocateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ExportStrategy) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(ExportFilter::new(filter));
        self
    }

    /// Extra data is visible to conditions and injectable by name.
    pub fn with_extra_data<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.extra_data.insert(name.into(), Arc::new(value));
        self
    }
}

/// The capability currently being resolved.
#[derive(Debug, Clone)]
pub struct LocateRequest {
    key: CapabilityKey,
    filter: Option<ExportFilter>,
}

impl LocateRequest {
    pub fn new(key: CapabilityKey, filter: Option<ExportFilter>) -> Self {
        Self { key, filter }
    }

    pub fn key(&self) -> &CapabilityKey {
        &self.key
    }

    pub fn filter(&self) -> Option<&ExportFilter> {
        self.filter.as_ref()
    }
}

/// One activation in progress.
#[derive(Debug, Clone)]
pub struct ResolutionFrame {
    pub key: CapabilityKey,
    pub activation_type: TypeKey,
    pub strategy: StrategyId,
}

/// Disposal entry of an uncached instance, held back until the call that
/// created it succeeds.
pub(crate) struct StagedDisposal {
    pub(crate) target: Scope,
    pub(crate) entry: DisposalEntry,
}

/// Mutable record threaded through one top-level locate call and every
/// nested activation it triggers. Never shared between unrelated calls.
pub struct InjectionContext {
    request: LocateRequest,
    extra_data: HashMap<String, Instance>,
    stack: Vec<ResolutionFrame>,
    staged: Vec<StagedDisposal>,
    config: Arc<ContainerConfig>,
}

impl InjectionContext {
    pub(crate) fn new(
        request: LocateRequest,
        extra_data: HashMap<String, Instance>,
        config: Arc<ContainerConfig>,
    ) -> Self {
        Self {
            request,
            extra_data,
            stack: Vec::new(),
            staged: Vec::new(),
            config,
        }
    }

    pub fn request(&self) -> &LocateRequest {
        &self.request
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn extra_data(&self, name: &str) -> Option<&Instance> {
        self.extra_data.get(name)
    }

    pub fn set_extra_data(&mut self, name: impl Into<String>, value: Instance) {
        self.extra_data.insert(name.into(), value);
    }

    pub fn resolution_stack(&self) -> &[ResolutionFrame] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Concrete type of the object whose dependencies are being resolved.
    pub fn injected_into(&self) -> Option<TypeKey> {
        self.stack.last().map(|frame| frame.activation_type)
    }

    pub(crate) fn enter(&mut self, frame: ResolutionFrame) -> Result<(), LocateError> {
        if self
            .stack
            .iter()
            .any(|active| active.key == frame.key || active.strategy == frame.strategy)
        {
            let mut chain: Vec<String> = self.stack.iter().map(|f| f.key.to_string()).collect();
            chain.push(frame.key.to_string());
            return Err(LocateError::CircularResolution {
                key: frame.key.to_string(),
                chain,
            });
        }

        let limit = self.config.max_resolution_depth;
        if self.stack.len() >= limit {
            return Err(LocateError::ResolutionDepthExceeded {
                key: frame.key.to_string(),
                depth: self.stack.len() + 1,
                limit,
            });
        }

        self.stack.push(frame);
        Ok(())
    }

    pub(crate) fn exit(&mut self) {
        self.stack.pop();
    }

    pub(crate) fn stage_disposal(&mut self, target: Scope, entry: DisposalEntry) {
        self.staged.push(StagedDisposal { target, entry });
    }

    /// Position to pass to [`InjectionContext::take_staged_since`].
    pub(crate) fn staged_mark(&self) -> usize {
        self.staged.len()
    }

    /// Entries staged after `mark`, in staging order.
    pub(crate) fn take_staged_since(&mut self, mark: usize) -> Vec<StagedDisposal> {
        let mark = mark.min(self.staged.len());
        self.staged.split_off(mark)
    }

    /// Run `f` against a nested request, restoring the current one afterwards.
    pub(crate) fn with_request<R>(&mut self, request: LocateRequest, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.request, request);
        let result = f(self);
        self.request = previous;
        result
    }
}

impl fmt::Debug for InjectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionContext")
            .field("request", &self.request.key)
            .field("extra_data", &self.extra_data.keys().collect::<Vec<_>>())
            .field("stack", &self.stack)
            .field("staged", &self.staged.len())
            .finish()
    }
}
