mod functional;
mod hooks;
mod memo;
mod singleton;

use async_trait::async_trait;
use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{any::Value, errors::ResolveErrorKind, module::Module, resolver::Resolver};

pub use functional::{AsyncFunctionalFactory, ConstantFactory, FunctionalFactory};
pub use hooks::Hook;
pub use singleton::{AsyncSingletonClassFactory, SingletonClassFactory};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactoryId(pub(crate) u64);

impl FactoryId {
    #[inline]
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Produces the value of a binding, synchronously.
///
/// A factory is stateful: singleton factories keep the produced value.
/// The [`Resolver`] it receives resolves dependencies in the module owning the binding.
pub trait SyncFactory: Send + Sync + 'static {
    fn id(&self) -> FactoryId;

    /// # Errors
    /// Returns an error if the value or one of its dependencies can't be produced.
    fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind>;
}

/// Produces the value of a binding, possibly suspending.
#[async_trait]
pub trait AsyncFactory: Send + Sync + 'static {
    fn id(&self) -> FactoryId;

    /// # Errors
    /// Returns an error if the value or one of its dependencies can't be produced.
    async fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind>;
}

/// Factory found by an async lookup, which falls back to sync bindings.
#[derive(Clone)]
pub enum AnyFactory {
    Sync(Arc<dyn SyncFactory>),
    Async(Arc<dyn AsyncFactory>),
}

impl AnyFactory {
    #[inline]
    #[must_use]
    pub fn id(&self) -> FactoryId {
        match self {
            Self::Sync(factory) => factory.id(),
            Self::Async(factory) => factory.id(),
        }
    }

    /// # Errors
    /// Propagates the factory's error.
    pub async fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        match self {
            Self::Sync(factory) => factory.get(resolver),
            Self::Async(factory) => factory.get(resolver).await,
        }
    }
}

/// Factory together with the module its binding lives in.
#[derive(Clone)]
pub struct FactoryRef<F> {
    pub owner: Module,
    pub factory: F,
}

impl<F> Debug for FactoryRef<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRef").field("owner", &self.owner.name()).finish_non_exhaustive()
    }
}

pub type SyncFactoryRef = FactoryRef<Arc<dyn SyncFactory>>;
pub type AsyncFactoryRef = FactoryRef<AnyFactory>;
