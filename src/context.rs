use parking_lot::Mutex;
use std::{
    fmt::{self, Debug, Formatter, Write as _},
    sync::Arc,
};
use tracing::debug;

use crate::{any::Value, errors::ResolveErrorKind, factory::FactoryId, key::BindingKey, module::ModuleId};

/// Upper bound on provide hops in one resolution.
pub const MAX_CHAIN_LEN: usize = 512;

/// One resolution step: `module` provided `key` through `factory`.
#[derive(Clone, Debug)]
pub struct Hop {
    pub(crate) module: ModuleId,
    pub(crate) module_name: Arc<str>,
    pub(crate) key: BindingKey,
    pub(crate) factory: FactoryId,
}

impl Hop {
    #[inline]
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &BindingKey {
        &self.key
    }

    /// Hops reaching one factory through different keys (aliases, imports) are the same target.
    #[inline]
    fn same_target(&self, other: &Hop) -> bool {
        self.module == other.module && self.factory == other.factory
    }
}

pub(crate) type Assignment = Box<dyn FnOnce(Value) -> Result<(), ResolveErrorKind> + Send>;

/// Property assignment waiting for a target that is still being constructed upstream.
struct Deferred {
    target: Hop,
    assign: Assignment,
}

/// Provide chain accumulated across nested `provide*` calls.
///
/// Each nested call works on its own extended copy, so sibling resolutions
/// running concurrently never observe each other's hops. Deferred property
/// assignments are shared by the whole resolution.
#[derive(Clone, Default)]
pub struct ProvideContext {
    chain: Vec<Hop>,
    deferred: Arc<Mutex<Vec<Deferred>>>,
}

impl ProvideContext {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn chain(&self) -> &[Hop] {
        &self.chain
    }

    /// Returns a copy with `hop` appended.
    /// The first hop of a resolution is preceded by a root hop targeting the same binding.
    pub(crate) fn extend(&self, hop: Hop) -> Result<Self, ResolveErrorKind> {
        let mut chain = Vec::with_capacity(self.chain.len() + 2);
        chain.extend_from_slice(&self.chain);
        if chain.is_empty() {
            chain.push(hop.clone());
        }
        chain.push(hop);

        let ctx = Self {
            chain,
            deferred: self.deferred.clone(),
        };
        if ctx.chain.len() > MAX_CHAIN_LEN {
            return Err(ResolveErrorKind::ChainTooLong {
                limit: MAX_CHAIN_LEN,
                chain: ctx.render(),
            });
        }
        Ok(ctx)
    }

    /// Whether the most recent hop's target is already being provided further up,
    /// ignoring the two most recent hops which belong to the current call.
    #[must_use]
    pub(crate) fn is_circular(&self) -> bool {
        let Some(current) = self.chain.last() else {
            return false;
        };
        let upstream = self.chain.len().saturating_sub(2);
        self.chain[..upstream].iter().any(|hop| hop.same_target(current))
    }

    /// The most recent hop, if it targets a binding already being provided further up.
    #[must_use]
    pub(crate) fn upstream_target(&self) -> Option<&Hop> {
        if self.is_circular() {
            self.chain.last()
        } else {
            None
        }
    }

    /// Queues `assign` until the provide call producing `target` has its value.
    pub(crate) fn defer(&self, target: Hop, assign: Assignment) {
        debug!(module = %target.module_name, key = %target.key, "Property deferred until its target is provided");
        self.deferred.lock().push(Deferred { target, assign });
    }

    /// Completes the provide call of the most recent hop: assignments deferred
    /// until its value exists are applied with `value`, or dropped on failure.
    pub(crate) fn settle(&self, result: Result<Value, ResolveErrorKind>) -> Result<Value, ResolveErrorKind> {
        let Some(current) = self.chain.last() else {
            return result;
        };
        let ready = {
            let mut deferred = self.deferred.lock();
            if deferred.is_empty() {
                return result;
            }
            let (ready, rest) = deferred.drain(..).partition::<Vec<_>, _>(|entry| entry.target.same_target(current));
            *deferred = rest;
            ready
        };
        if ready.is_empty() {
            return result;
        }

        let value = result?;
        debug!(count = ready.len(), "Applying deferred properties");
        for entry in ready {
            (entry.assign)(value.clone())?;
        }
        Ok(value)
    }

    /// Human-readable chain, one hop per line, root first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, hop) in self.chain.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let _ = write!(out, "  {index}: {} provides {}", hop.module_name, hop.key);
        }
        out
    }
}

impl Debug for ProvideContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideContext")
            .field("chain", &self.chain)
            .field("deferred", &self.deferred.lock().len())
            .finish()
    }
}
