use async_trait::async_trait;
use futures::FutureExt as _;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, debug_span, error, Instrument as _};

use super::{hooks::Hooks, memo::AsyncSingleton, AsyncFactory, FactoryId, SyncFactory};
use crate::{
    any::Value,
    errors::{InstantiateErrorKind, ResolveErrorKind},
    injection::{Injectable, Injection},
    resolver::Resolver,
};

/// Singleton class binding constructed synchronously.
///
/// Construction order: constructor arguments, constructor, `constructed` hooks,
/// properties, `done` hooks. The instance is cached right after the constructor
/// returns, so properties resolving back to this class receive it. A property
/// pointing at a class whose constructor is still running further up is
/// assigned when that class is provided, after this instance's `done` hooks.
pub struct SingletonClassFactory<T> {
    id: FactoryId,
    injection: Injection<T>,
    instance: Mutex<Option<Arc<T>>>,
    hooks: Hooks<T>,
}

impl<T: Injectable> SingletonClassFactory<T> {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_injection(T::injection())
    }
}

impl<T: Injectable> Default for SingletonClassFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> SingletonClassFactory<T> {
    #[must_use]
    pub fn with_injection(injection: Injection<T>) -> Self {
        Self {
            id: FactoryId::next(),
            injection,
            instance: Mutex::new(None),
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

    fn finish(&self, instance: &Arc<T>, resolver: &Resolver) -> Result<(), ResolveErrorKind> {
        self.hooks.constructed(instance)?;
        self.injection.inject_properties_sync(instance, resolver)?;
        self.hooks.done(instance)
    }
}

impl<T: Send + Sync + 'static> SyncFactory for SingletonClassFactory<T> {
    #[inline]
    fn id(&self) -> FactoryId {
        self.id
    }

    fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        let span = debug_span!("class", class = self.injection.class().short_name());
        let _guard = span.enter();

        if let Some(instance) = self.instance.lock().clone() {
            debug!("Found in cache");
            return Ok(instance as Value);
        }
        if resolver.context().is_circular() {
            let err = self.injection.circular_error(resolver);
            error!("{}", err);
            return Err(err);
        }

        let arguments = self.injection.constructor_arguments_sync(resolver)?;
        let instance = Arc::new(self.injection.construct(arguments)?);
        {
            let mut guard = self.instance.lock();
            if let Some(existing) = guard.as_ref() {
                debug!("Constructed concurrently, keeping the first instance");
                return Ok(existing.clone() as Value);
            }
            *guard = Some(instance.clone());
        }
        debug!("Constructed");

        if let Err(err) = self.finish(&instance, resolver) {
            *self.instance.lock() = None;
            return Err(err);
        }
        Ok(instance as Value)
    }
}

struct AsyncClassInner<T> {
    injection: Injection<T>,
    hooks: Hooks<T>,
    slot: AsyncSingleton<T>,
}

impl<T: Send + Sync + 'static> AsyncClassInner<T> {
    async fn construct(&self, resolver: Resolver) -> Result<Arc<T>, ResolveErrorKind> {
        let arguments = self.injection.constructor_arguments_async(&resolver).await?;
        let instance = Arc::new(self.injection.construct(arguments)?);
        self.slot.publish(instance.clone());
        debug!("Constructed");

        self.hooks.constructed(&instance)?;
        self.injection.inject_properties_async(&instance, &resolver).await?;
        self.hooks.done(&instance)?;
        Ok(instance)
    }
}

/// Singleton class binding constructed asynchronously.
///
/// Constructor arguments resolve concurrently. Concurrent requests share one
/// construction, and a failed construction is retried by the next request.
pub struct AsyncSingletonClassFactory<T> {
    id: FactoryId,
    inner: Arc<AsyncClassInner<T>>,
}

impl<T: Injectable> AsyncSingletonClassFactory<T> {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_injection(T::injection())
    }
}

impl<T: Injectable> Default for AsyncSingletonClassFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> AsyncSingletonClassFactory<T> {
    #[must_use]
    pub fn with_injection(injection: Injection<T>) -> Self {
        Self {
            id: FactoryId::next(),
            inner: Arc::new(AsyncClassInner {
                injection,
                hooks: Hooks::default(),
                slot: AsyncSingleton::new(),
            }),
        }
    }

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
impl<T: Send + Sync + 'static> AsyncFactory for AsyncSingletonClassFactory<T> {
    #[inline]
    fn id(&self) -> FactoryId {
        self.id
    }

    async fn get(&self, resolver: &Resolver) -> Result<Value, ResolveErrorKind> {
        let span = debug_span!("async_class", class = self.inner.injection.class().short_name());

        async {
            if let Some(instance) = self.inner.slot.ready() {
                debug!("Found in cache");
                return Ok(instance as Value);
            }
            // A pending construction further up the chain is our own: joining it would never complete.
            if resolver.context().is_circular() {
                let err = self.inner.injection.circular_error(resolver);
                error!("{}", err);
                return Err(err);
            }

            let inner = self.inner.clone();
            let resolver = resolver.clone();
            let instance = self
                .inner
                .slot
                .get_or_construct(move || async move { inner.construct(resolver).await }.boxed())
                .await?;
            Ok(instance as Value)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::{AsyncSingletonClassFactory, SingletonClassFactory};
    use crate::{
        errors::SetupErrorKind,
        injection::{Injectable, Injected, Injection},
        key::BindingKey,
        Container, Module, ModuleSetup,
    };

    use futures::future::join_all;
    use parking_lot::Mutex;
    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };
    use tracing_test::traced_test;

    #[derive(Default)]
    struct App;

    #[async_trait::async_trait]
    impl ModuleSetup for App {
        async fn setup(&self, _module: &Module) -> Result<(), SetupErrorKind> {
            Ok(())
        }
    }

    struct Settings;

    impl Injectable for Settings {
        fn injection() -> Injection<Self> {
            Injection::new(|_| Ok(Settings))
        }
    }

    struct Service {
        settings: Arc<Settings>,
        name: Injected<String>,
    }

    impl Injectable for Service {
        fn injection() -> Injection<Self> {
            Injection::new(|mut args| {
                Ok(Service {
                    settings: args.take()?,
                    name: Injected::new(),
                })
            })
            .arg("settings", BindingKey::of::<Settings>())
            .property("name", "service:name", |service: &Service| &service.name)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sync_singleton_lifecycle() {
        let container = Container::new();
        let module = container.register::<App>().await.unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));

        module.bind().sync_singleton_class::<Settings>().unwrap();
        module.bind().constant("service:name", String::from("users")).unwrap();
        module
            .bind_sync(
                BindingKey::of::<Service>(),
                SingletonClassFactory::<Service>::new()
                    .on_constructed({
                        let events = events.clone();
                        move |service| {
                            events.lock().push(("constructed", service.name.is_injected()));
                            Ok(())
                        }
                    })
                    .on_done({
                        let events = events.clone();
                        move |service| {
                            events.lock().push(("done", service.name.is_injected()));
                            Ok(())
                        }
                    }),
            )
            .unwrap();

        let first = module.provide_sync::<Service>(BindingKey::of::<Service>()).unwrap();
        let second = module.provide_sync::<Service>(BindingKey::of::<Service>()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            &first.settings,
            &module.provide_sync::<Settings>(BindingKey::of::<Settings>()).unwrap()
        ));
        assert_eq!(first.name.get().unwrap().as_str(), "users");
        assert_eq!(*events.lock(), [("constructed", false), ("done", true)]);
    }

    struct Slow;

    static SLOW_BUILT: AtomicU8 = AtomicU8::new(0);

    impl Injectable for Slow {
        fn injection() -> Injection<Self> {
            Injection::new(|_| {
                SLOW_BUILT.fetch_add(1, Ordering::SeqCst);
                Ok(Slow)
            })
            .arg("delay", "delay")
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_singleton_constructed_once() {
        let container = Container::new();
        let module = container.register::<App>().await.unwrap();

        module
            .bind()
            .functional("delay", |_| async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(())
            })
            .unwrap();
        module
            .bind_async(BindingKey::of::<Slow>(), AsyncSingletonClassFactory::<Slow>::new())
            .unwrap();

        let instances = join_all((0..8).map(|_| module.provide_async::<Slow>(BindingKey::of::<Slow>()))).await;
        let first = instances[0].as_ref().unwrap();
        for instance in &instances {
            assert!(Arc::ptr_eq(first, instance.as_ref().unwrap()));
        }
        assert_eq!(SLOW_BUILT.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Left(#[allow(dead_code)] Arc<Right>);
    #[derive(Debug)]
    struct Right(#[allow(dead_code)] Arc<Left>);

    impl Injectable for Left {
        fn injection() -> Injection<Self> {
            Injection::new(|mut args| Ok(Left(args.take()?))).arg("right", BindingKey::of::<Right>())
        }
    }

    impl Injectable for Right {
        fn injection() -> Injection<Self> {
            Injection::new(|mut args| Ok(Right(args.take()?))).arg("left", BindingKey::of::<Left>())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_constructor_cycle_detected() {
        let container = Container::new();
        let module = container.register::<App>().await.unwrap();
        module.bind().sync_singleton_class::<Left>().unwrap();
        module.bind().sync_singleton_class::<Right>().unwrap();

        let err = module.provide_sync::<Left>(BindingKey::of::<Left>()).unwrap_err();
        assert!(err.is_circular());
        assert!(err.to_string().contains("property"));

        // Nothing half-built is cached: the cycle is reported again.
        assert!(module.provide_sync::<Right>(BindingKey::of::<Right>()).unwrap_err().is_circular());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_constructor_cycle_detected() {
        let container = Container::new();
        let module = container.register::<App>().await.unwrap();
        module.bind().singleton_class::<Left>().unwrap();
        module.bind().singleton_class::<Right>().unwrap();

        let err = module.provide_async::<Left>(BindingKey::of::<Left>()).await.unwrap_err();
        assert!(err.is_circular());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_hook_isnt_cached() {
        let container = Container::new();
        let module = container.register::<App>().await.unwrap();
        let fail = Arc::new(AtomicU8::new(1));

        module
            .bind_sync(
                BindingKey::of::<Settings>(),
                SingletonClassFactory::<Settings>::new().on_done({
                    let fail = fail.clone();
                    move |_| {
                        if fail.swap(0, Ordering::SeqCst) == 1 {
                            return Err(anyhow::anyhow!("hook failed").into());
                        }
                        Ok(())
                    }
                }),
            )
            .unwrap();

        assert!(module.provide_sync::<Settings>(BindingKey::of::<Settings>()).is_err());
        assert!(module.provide_sync::<Settings>(BindingKey::of::<Settings>()).is_ok());
    }
}
