use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc};
use tracing::{debug, debug_span, error, Instrument as _};

use super::{hooks::Hooks, memo::AsyncSingleton, AsyncFactory, FactoryId, SyncFactory};
use crate::{
    any::{TypeInfo, Value},
    config::Config,
    errors::{InjectionError, InjectionTarget, InstantiateErrorKind, ResolveErrorKind},
    resolver::Resolver,
};

type SyncFn<T> = Arc<dyn Fn(&Resolver) -> Result<T, InstantiateErrorKind> + Send + Sync>;
type AsyncFn<T> = Arc<dyn Fn(Resolver) -> BoxFuture<'static, Result<T, InstantiateErrorKind>> + Send + Sync>;

/// Binding produced by a user function.
///
/// With [`Config::singleton`] the first produced value is kept,
/// otherwise the function runs on every resolution.
pub struct FunctionalFactory<T> {
    id: FactoryId,
    f: SyncFn<T>,
    config: Config,
    cached: Mutex<Option<Arc<T>>>,
    hooks: Hooks<T>,
}

impl<T: Send + Sync + 'static> FunctionalFactory<T> {
    #[inline]
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Resolver) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        Self::with_config(f, Config::default())
    }

    #[must_use]
    pub fn with_config<F>(f: F, config: Config) -> Self
    where
        F: Fn(&Resolver) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        Self {
            id: FactoryId::next(),
            f: Arc::new(f),
            config,
            cached: Mutex::new(None),
            hooks: Hooks::default(),
        }
    }

    #[must_use]
    pub fn on_constructed(mut self, hook: impl Fn(&Arc<T>) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        self.hooks.on_constructed(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_done(mut self, hook: impl Fn(&Arc<T>) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        self.hooks.on_done(Arc::new(hook));
        self
    }
}

impl<T: Send + Sync + 'static> SyncFactory for FunctionalFactory<T> {
    #[inline]
    fn id(&self) -> FactoryId {
        self.id
    }

    fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        let span = debug_span!("functional", value = TypeInfo::of::<T>().short_name());
        let _guard = span.enter();

        if self.config.singleton {
            if let Some(instance) = self.cached.lock().clone() {
                debug!("Found in cache");
                return Ok(instance as Value);
            }
        }

        let instance = Arc::new((self.f)(resolver).map_err(|err| {
            let err = ResolveErrorKind::from(err);
            error!("{}", err);
            err
        })?);
        debug!("Produced");

        let instance = if self.config.singleton {
            let mut guard = self.cached.lock();
            match guard.as_ref() {
                Some(existing) => return Ok(existing.clone() as Value),
                None => {
                    *guard = Some(instance.clone());
                    instance
                }
            }
        } else {
            instance
        };

        if let Err(err) = self.hooks.constructed(&instance).and_then(|()| self.hooks.done(&instance)) {
            if self.config.singleton {
                *self.cached.lock() = None;
            }
            return Err(err);
        }
        Ok(instance as Value)
    }
}

struct AsyncFunctionalInner<T> {
    f: AsyncFn<T>,
    hooks: Hooks<T>,
}

impl<T: Send + Sync + 'static> AsyncFunctionalInner<T> {
    async fn produce(&self, resolver: Resolver) -> Result<Arc<T>, ResolveErrorKind> {
        let instance = Arc::new((self.f)(resolver).await.map_err(|err| {
            let err = ResolveErrorKind::from(err);
            error!("{}", err);
            err
        })?);
        debug!("Produced");

        self.hooks.constructed(&instance)?;
        self.hooks.done(&instance)?;
        Ok(instance)
    }
}

/// Binding produced by an async user function.
///
/// A singleton is produced once even under concurrent requests:
/// requests arriving while it's being produced wait for that production.
pub struct AsyncFunctionalFactory<T> {
    id: FactoryId,
    inner: Arc<AsyncFunctionalInner<T>>,
    config: Config,
    slot: AsyncSingleton<T>,
}

impl<T: Send + Sync + 'static> AsyncFunctionalFactory<T> {
    #[inline]
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InstantiateErrorKind>> + Send + 'static,
    {
        Self::with_config(f, Config::default())
    }

    #[must_use]
    pub fn with_config<F, Fut>(f: F, config: Config) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InstantiateErrorKind>> + Send + 'static,
    {
        Self {
            id: FactoryId::next(),
            inner: Arc::new(AsyncFunctionalInner {
                f: Arc::new(move |resolver| f(resolver).boxed()),
                hooks: Hooks::default(),
            }),
            config,
            slot: AsyncSingleton::new(),
        }
    }

    /// Hooks can only be attached while building the factory, before it's bound.
    #[must_use]
    pub fn on_constructed(mut self, hook: impl Fn(&Arc<T>) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.hooks.on_constructed(Arc::new(hook));
        }
        self
    }

    #[must_use]
    pub fn on_done(mut self, hook: impl Fn(&Arc<T>) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.hooks.on_done(Arc::new(hook));
        }
        self
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> AsyncFactory for AsyncFunctionalFactory<T> {
    #[inline]
    fn id(&self) -> FactoryId {
        self.id
    }

    async fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        let span = debug_span!("async_functional", value = TypeInfo::of::<T>().short_name());

        async {
            if !self.config.singleton {
                return self.inner.produce(resolver.clone()).await.map(|instance| instance as Value);
            }

            if let Some(instance) = self.slot.ready() {
                debug!("Found in cache");
                return Ok(instance as Value);
            }
            // Joining our own pending production would never complete.
            if resolver.context().is_circular() {
                let err = circular_error::<T>(resolver);
                error!("{}", err);
                return Err(err);
            }

            let inner = self.inner.clone();
            let resolver = resolver.clone();
            let instance = self
                .slot
                .get_or_construct(move || async move { inner.produce(resolver).await }.boxed())
                .await?;
            Ok(instance as Value)
        }
        .instrument(span)
        .await
    }
}

fn circular_error<T: 'static>(resolver: &Resolver) -> ResolveErrorKind {
    let class = TypeInfo::of::<T>().short_name();
    let key = resolver
        .context()
        .chain()
        .last()
        .map_or_else(|| TypeInfo::of::<T>().into(), |hop| hop.key().clone());
    ResolveErrorKind::CircularDependency(Box::new(InjectionError::new(
        format!("Circular dependency detected while producing {class}"),
        class,
        InjectionTarget::Constructor,
        key,
        resolver.context().render(),
        None,
    )))
}

/// Binding to a value that already exists.
pub struct ConstantFactory {
    id: FactoryId,
    value: Value,
}

impl ConstantFactory {
    #[inline]
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_value(Arc::new(value))
    }

    #[inline]
    #[must_use]
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::from_value(value)
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_value(value: Value) -> Self {
        Self {
            id: FactoryId::next(),
            value,
        }
    }
}

impl SyncFactory for ConstantFactory {
    #[inline]
    fn id(&self) -> FactoryId {
        self.id
    }

    #[inline]
    fn get(&self, _resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        Ok(self.value.clone())
    }
}
