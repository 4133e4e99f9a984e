mod binder;
mod definition;
mod dynamic;
mod fiber;

use futures::{
    future::{BoxFuture, Shared},
    FutureExt as _,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use tracing::{debug, debug_span, error, Instrument as _};

use crate::{
    any::{downcast, TypeInfo, Value},
    config::{Config, ProvideOptions},
    container::{Container, ContainerInner},
    context::{Hop, ProvideContext},
    errors::{BindingErrorKind, BindingStyle, ResolveErrorKind, SetupErrorKind},
    factory::{
        AnyFactory, AsyncFactory, AsyncFactoryRef, ConstantFactory, FactoryId, FactoryRef, FunctionalFactory, SyncFactory,
        SyncFactoryRef,
    },
    key::{BindingKey, KeyTerm},
    resolver::{cast, Resolver},
};

pub use binder::Binder;
pub use definition::{ModuleKind, ModuleSetup, ModuleTerm};
pub use dynamic::Importer;
pub use fiber::ParentModule;

use definition::SetupFn;

pub(crate) use dynamic::WeakImporter;

/// Outcome of resolving a property.
pub(crate) enum PropertyValue {
    Ready(Option<Value>),
    /// The target is being provided further up the chain.
    Upstream(Hop),
}

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub(crate) u64);

impl ModuleId {
    #[inline]
    fn next() -> Self {
        Self(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lookup guard: `(module, key)` pairs already visited by one lookup.
/// Re-exports between mutually importing modules would otherwise recurse forever.
pub(crate) type Visited = Vec<(ModuleId, BindingKey)>;

#[derive(Default)]
struct Bindings {
    sync: BTreeMap<BindingKey, Arc<dyn SyncFactory>>,
    asynchronous: BTreeMap<BindingKey, Arc<dyn AsyncFactory>>,
    aliases: BTreeMap<BindingKey, BindingKey>,
    exports: BTreeSet<BindingKey>,
    imports: Vec<Weak<ModuleInner>>,
    dynamic_imports: Vec<Module>,
}

impl Bindings {
    #[inline]
    fn has_own_bind_or_alias(&self, key: &BindingKey) -> bool {
        self.sync.contains_key(key) || self.asynchronous.contains_key(key) || self.aliases.contains_key(key)
    }

    /// Imported modules, dynamic ones last.
    fn imported(&self) -> Vec<Module> {
        self.imports
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Module { inner })
            .chain(self.dynamic_imports.iter().cloned())
            .collect()
    }
}

type SharedInit = Shared<BoxFuture<'static, Result<(), Arc<SetupErrorKind>>>>;

enum InitState {
    Pending,
    Running(SharedInit),
    Done,
}

pub(crate) struct ModuleInner {
    id: ModuleId,
    name: Arc<str>,
    type_info: Option<TypeInfo>,
    kind: ModuleKind,
    config: Option<Value>,
    setup: Option<SetupFn>,
    container: Weak<ContainerInner>,
    parent: Option<Module>,
    importer: Mutex<Option<WeakImporter>>,
    bindings: Mutex<Bindings>,
    init: Mutex<InitState>,
}

/// A named scope owning bindings, aliases, imports and exports.
///
/// `Module` is a handle: clones refer to the same module.
#[derive(Clone)]
pub struct Module {
    pub(crate) inner: Arc<ModuleInner>,
}

impl Module {
    /// Instantiates a module from its definition and applies default bindings.
    pub(crate) fn from_term(term: &ModuleTerm, container: Weak<ContainerInner>) -> Self {
        let module = Self {
            inner: Arc::new(ModuleInner {
                id: ModuleId::next(),
                name: Arc::from(term.name.as_ref()),
                type_info: Some(term.type_info),
                kind: term.kind,
                config: Some(term.config.clone()),
                setup: Some(term.setup.clone()),
                container,
                parent: None,
                importer: Mutex::new(None),
                bindings: Mutex::new(Bindings::default()),
                init: Mutex::new(InitState::Pending),
            }),
        };
        module.apply_default_bindings();
        debug!(module = %module.name(), kind = ?module.kind(), "Module constructed");
        module
    }

    fn apply_default_bindings(&self) {
        let mut bindings = self.inner.bindings.lock();
        bindings.sync.insert(
            BindingKey::of::<Module>(),
            Arc::new(FunctionalFactory::with_config(
                |resolver: &Resolver| Ok(resolver.module().clone()),
                Config::transient(),
            )),
        );
        if let (Some(type_info), Some(config)) = (self.inner.type_info, self.inner.config.clone()) {
            bindings
                .sync
                .insert(BindingKey::Type(type_info), Arc::new(ConstantFactory::from_value(config)));
        }
        if let Some(parent) = &self.inner.parent {
            bindings.sync.insert(
                BindingKey::of::<ParentModule>(),
                Arc::new(ConstantFactory::new(ParentModule(parent.clone()))),
            );
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.inner.kind
    }

    /// The module's definition, `None` for fibers or a type other than the definition's.
    #[must_use]
    pub fn config<M: Send + Sync + 'static>(&self) -> Option<Arc<M>> {
        downcast::<M>(self.inner.config.clone()?).ok()
    }

    /// Container the module belongs to.
    ///
    /// # Errors
    /// Returns [`BindingErrorKind::Detached`] once the container is dropped.
    pub fn container(&self) -> Result<Container, BindingErrorKind> {
        self.inner
            .container
            .upgrade()
            .map(|inner| Container { inner })
            .ok_or_else(|| BindingErrorKind::Detached {
                module: self.name().to_owned(),
            })
    }

    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Module) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Builder for the common binding kinds.
    #[inline]
    #[must_use]
    pub fn bind(&self) -> Binder<'_> {
        Binder::new(self)
    }

    /// # Errors
    /// Fails on an empty key, or a key already bound as async.
    pub fn bind_sync<F: SyncFactory>(&self, key: impl Into<KeyTerm>, factory: F) -> Result<(), BindingErrorKind> {
        let key = self.checked_key(key)?;
        let mut bindings = self.inner.bindings.lock();
        if bindings.asynchronous.contains_key(&key) {
            return Err(self.conflicting_style(key, BindingStyle::Async, BindingStyle::Sync));
        }
        debug!(module = %self.name(), key = %key, "Bound sync");
        bindings.sync.insert(key, Arc::new(factory));
        Ok(())
    }

    /// # Errors
    /// Fails on an empty key, or a key already bound as sync.
    pub fn bind_async<F: AsyncFactory>(&self, key: impl Into<KeyTerm>, factory: F) -> Result<(), BindingErrorKind> {
        let key = self.checked_key(key)?;
        let mut bindings = self.inner.bindings.lock();
        if bindings.sync.contains_key(&key) {
            return Err(self.conflicting_style(key, BindingStyle::Sync, BindingStyle::Async));
        }
        debug!(module = %self.name(), key = %key, "Bound async");
        bindings.asynchronous.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Removes the key's binding and alias. Returns whether anything was removed.
    ///
    /// # Errors
    /// Propagates key resolution errors.
    pub fn unbind(&self, key: impl Into<KeyTerm>) -> Result<bool, BindingErrorKind> {
        let key = key.into().resolve()?;
        let mut bindings = self.inner.bindings.lock();
        let removed = bindings.sync.remove(&key).is_some()
            | bindings.asynchronous.remove(&key).is_some()
            | bindings.aliases.remove(&key).is_some();
        Ok(removed)
    }

    #[must_use]
    pub fn has_own_bind_or_alias(&self, key: &BindingKey) -> bool {
        self.inner.bindings.lock().has_own_bind_or_alias(key)
    }

    #[must_use]
    pub fn exports(&self) -> BTreeSet<BindingKey> {
        self.inner.bindings.lock().exports.clone()
    }

    #[inline]
    fn exports_key(&self, key: &BindingKey) -> bool {
        self.inner.bindings.lock().exports.contains(key)
    }

    /// Whether `key` is bound here or exported by one of the imports.
    /// Fibers also reach what their parent reaches.
    fn is_reachable(&self, key: &BindingKey) -> bool {
        let imported = {
            let bindings = self.inner.bindings.lock();
            if bindings.has_own_bind_or_alias(key) {
                return true;
            }
            bindings.imported()
        };
        imported.iter().any(|module| module.exports_key(key))
            || self.inner.parent.as_ref().is_some_and(|parent| parent.is_reachable(key))
    }

    /// Makes keys visible to importers of this module.
    ///
    /// # Errors
    /// Fails for fibers, and for keys neither bound here nor exported by an import.
    pub fn export<I, K>(&self, keys: I) -> Result<(), BindingErrorKind>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyTerm>,
    {
        self.ensure_not_fiber("export")?;
        let keys = self.reachable_keys(keys)?;

        let mut bindings = self.inner.bindings.lock();
        for key in keys {
            debug!(module = %self.name(), key = %key, "Exported");
            bindings.exports.insert(key);
        }
        Ok(())
    }

    /// Exports keys, then makes them resolvable container-wide.
    ///
    /// # Errors
    /// See [`Self::export`]; also fails if the container is gone.
    pub fn export_global<I, K>(&self, keys: I) -> Result<(), BindingErrorKind>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyTerm>,
    {
        self.ensure_not_fiber("export globally")?;
        let keys = self.reachable_keys(keys)?;
        self.export(keys.iter())?;

        let container = self.container()?;
        for key in keys {
            container.register_global_binding_ref(self, key)?;
        }
        Ok(())
    }

    /// Makes `alias` resolve to whatever `key` resolves to.
    /// An own binding under `alias` still takes precedence.
    ///
    /// # Errors
    /// Fails if `key` is unreachable, or the alias would loop back on itself.
    pub fn alias(&self, key: impl Into<KeyTerm>, alias: impl Into<KeyTerm>) -> Result<(), BindingErrorKind> {
        let key = self.checked_key(key)?;
        let alias = self.checked_key(alias)?;

        if !self.is_reachable(&key) {
            return Err(BindingErrorKind::AliasUnbound {
                module: self.name().to_owned(),
                key,
                alias,
            });
        }

        let mut bindings = self.inner.bindings.lock();
        let mut target = Some(&key);
        while let Some(current) = target {
            if *current == alias {
                return Err(BindingErrorKind::AliasLoop {
                    module: self.name().to_owned(),
                    key,
                    alias,
                });
            }
            target = bindings.aliases.get(current);
        }
        debug!(module = %self.name(), key = %key, alias = %alias, "Aliased");
        bindings.aliases.insert(alias, key);
        Ok(())
    }

    /// Imports module definitions.
    ///
    /// Regular modules are registered in the container (once per type) and
    /// shared; dynamic modules are instantiated for this module alone.
    ///
    /// # Errors
    /// Fails for fiber definitions, for dynamic imports into a fiber, and
    /// with the first failing initialization.
    pub async fn import<I>(&self, terms: I) -> Result<(), SetupErrorKind>
    where
        I: IntoIterator<Item = ModuleTerm>,
    {
        let terms: Vec<ModuleTerm> = terms.into_iter().collect();
        let mut regular = Vec::new();
        let mut dynamic = Vec::new();
        for term in terms {
            match term.kind {
                ModuleKind::Fiber => {
                    return Err(BindingErrorKind::FiberImport {
                        module: term.type_info.name,
                    }
                    .into());
                }
                ModuleKind::Dynamic => {
                    self.ensure_not_fiber("import a dynamic module")?;
                    dynamic.push(term);
                }
                ModuleKind::Regular => regular.push(term),
            }
        }

        if !regular.is_empty() {
            let container = self.container()?;
            let modules = container.register_batch_from(regular, Some(self.id())).await?;
            let mut bindings = self.inner.bindings.lock();
            for module in modules {
                debug!(module = %self.name(), imported = %module.name(), "Imported");
                bindings.imports.push(Arc::downgrade(&module.inner));
            }
        }

        for term in dynamic {
            let module = Module::from_term(&term, self.inner.container.clone());
            module.set_importer(self.weak_importer());
            module.init_from(Some(self.id())).await?;
            debug!(module = %self.name(), imported = %module.name(), "Imported dynamic module");
            self.inner.bindings.lock().dynamic_imports.push(module);
        }
        Ok(())
    }

    /// Runs the module's setup once. Repeated and concurrent calls share the first run.
    ///
    /// # Errors
    /// Returns the setup's error; a failed setup may be retried.
    pub async fn init(&self) -> Result<(), SetupErrorKind> {
        self.init_from(None).await
    }

    /// `waiter` is the module whose setup is waiting for this init, if any.
    pub(crate) async fn init_from(&self, waiter: Option<ModuleId>) -> Result<(), SetupErrorKind> {
        let (init, joined) = {
            let mut state = self.inner.init.lock();
            match &*state {
                InitState::Done => return Ok(()),
                InitState::Running(init) => (init.clone(), true),
                InitState::Pending => {
                    let init = run_init(Arc::downgrade(&self.inner)).boxed().shared();
                    *state = InitState::Running(init.clone());
                    (init, false)
                }
            }
        };

        let _wait = match (waiter, self.container()) {
            (Some(waiter), Ok(container)) => {
                let wait = container.begin_wait(waiter, self.id());
                if wait.is_none() && joined {
                    debug!(module = %self.name(), "Init already in progress up the import chain");
                    return Ok(());
                }
                wait
            }
            _ => None,
        };
        if joined {
            debug!(module = %self.name(), "Joined in-flight init");
        }

        init.await.map_err(SetupErrorKind::from_shared)
    }

    /// # Errors
    /// See [`Self::provide_sync_with`].
    #[inline]
    pub fn provide_sync<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        self.provide_sync_in(key, None)
    }

    /// # Errors
    /// See [`Self::provide_async_with`].
    #[inline]
    pub async fn provide_async<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        self.provide_async_in(key, None).await
    }

    pub(crate) fn provide_sync_in<T: Send + Sync + 'static>(
        &self,
        key: impl Into<KeyTerm>,
        ctx: Option<&ProvideContext>,
    ) -> Result<Arc<T>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        match self.provide_sync_with(key.clone(), ProvideOptions::default(), ctx)? {
            Some(value) => cast(key, value),
            None => Err(self.not_found(key)),
        }
    }

    pub(crate) async fn provide_async_in<T: Send + Sync + 'static>(
        &self,
        key: impl Into<KeyTerm>,
        ctx: Option<&ProvideContext>,
    ) -> Result<Arc<T>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        match self.provide_async_with(key.clone(), ProvideOptions::default(), ctx).await? {
            Some(value) => cast(key, value),
            None => Err(self.not_found(key)),
        }
    }

    /// Resolves `key` synchronously, extending `ctx` with one hop.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NotFound`] if no binding is reachable (unless optional)
    /// - [`ResolveErrorKind::AsyncResolvedAsSync`] if the binding is async
    /// - Any error of the factory producing the value
    pub fn provide_sync_with(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: Option<&ProvideContext>,
    ) -> Result<Option<Value>, ResolveErrorKind> {
        let span = debug_span!("provide", key = %key, module = %self.name());
        let _guard = span.enter();

        match self.locate_sync(key, options, ctx)? {
            Some((factory, resolver)) => resolver.context().settle(factory.get(&resolver)).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves `key`, allowing async and sync bindings.
    ///
    /// # Errors
    /// See [`Self::provide_sync_with`], except that async bindings are accepted.
    pub async fn provide_async_with(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: Option<&ProvideContext>,
    ) -> Result<Option<Value>, ResolveErrorKind> {
        let span = debug_span!("provide_async", key = %key, module = %self.name());

        async {
            match self.locate_async(key, options, ctx)? {
                Some((factory, resolver)) => resolver.context().settle(factory.get(&resolver).await).map(Some),
                None => Ok(None),
            }
        }
        .instrument(span)
        .await
    }

    /// Like [`Self::provide_sync_with`], except that a target already being
    /// provided further up isn't an error: the property waits for it.
    pub(crate) fn provide_property_sync(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: &ProvideContext,
    ) -> Result<PropertyValue, ResolveErrorKind> {
        let span = debug_span!("provide", key = %key, module = %self.name());
        let _guard = span.enter();

        let Some((factory, resolver)) = self.locate_sync(key, options, Some(ctx))? else {
            return Ok(PropertyValue::Ready(None));
        };
        if let Some(target) = resolver.context().upstream_target() {
            return Ok(PropertyValue::Upstream(target.clone()));
        }
        resolver
            .context()
            .settle(factory.get(&resolver))
            .map(|value| PropertyValue::Ready(Some(value)))
    }

    pub(crate) async fn provide_property_async(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: &ProvideContext,
    ) -> Result<PropertyValue, ResolveErrorKind> {
        let span = debug_span!("provide_async", key = %key, module = %self.name());

        async {
            let Some((factory, resolver)) = self.locate_async(key, options, Some(ctx))? else {
                return Ok(PropertyValue::Ready(None));
            };
            if let Some(target) = resolver.context().upstream_target() {
                return Ok(PropertyValue::Upstream(target.clone()));
            }
            resolver
                .context()
                .settle(factory.get(&resolver).await)
                .map(|value| PropertyValue::Ready(Some(value)))
        }
        .instrument(span)
        .await
    }

    /// Finds the factory and builds the resolver it runs with.
    /// `None` for a missing optional binding.
    fn locate_sync(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: Option<&ProvideContext>,
    ) -> Result<Option<(Arc<dyn SyncFactory>, Resolver)>, ResolveErrorKind> {
        let found = match self.get_sync_factory(&key) {
            Ok(found) => found,
            Err(err) if options.optional && err.is_not_found() => {
                debug!("Optional binding not found");
                return Ok(None);
            }
            Err(err) => {
                error!("{}", err);
                return Err(err);
            }
        };
        let resolver = self.resolver_for(&found.owner, key, found.factory.id(), ctx)?;
        Ok(Some((found.factory, resolver)))
    }

    fn locate_async(
        &self,
        key: BindingKey,
        options: ProvideOptions,
        ctx: Option<&ProvideContext>,
    ) -> Result<Option<(AnyFactory, Resolver)>, ResolveErrorKind> {
        let found = match self.get_async_factory(&key) {
            Ok(found) => found,
            Err(err) if options.optional && err.is_not_found() => {
                debug!("Optional binding not found");
                return Ok(None);
            }
            Err(err) => {
                error!("{}", err);
                return Err(err);
            }
        };
        let resolver = self.resolver_for(&found.owner, key, found.factory.id(), ctx)?;
        Ok(Some((found.factory, resolver)))
    }

    fn resolver_for(
        &self,
        owner: &Module,
        key: BindingKey,
        factory: FactoryId,
        ctx: Option<&ProvideContext>,
    ) -> Result<Resolver, ResolveErrorKind> {
        let hop = Hop {
            module: owner.id(),
            module_name: owner.inner.name.clone(),
            key,
            factory,
        };
        let ctx = match ctx {
            Some(ctx) => ctx.extend(hop)?,
            None => ProvideContext::new().extend(hop)?,
        };
        let scope = if self.descends_from(owner) { self } else { owner };
        Ok(Resolver::new(scope.clone(), self.clone(), ctx))
    }

    /// Whether `ancestor` is this module or one of its fiber parents.
    fn descends_from(&self, ancestor: &Module) -> bool {
        let mut current = Some(self);
        while let Some(module) = current {
            if module.ptr_eq(ancestor) {
                return true;
            }
            current = module.inner.parent.as_ref();
        }
        false
    }

    /// Finds the sync factory for `key`.
    ///
    /// Order: own async bindings (an error), own sync bindings, aliases,
    /// exports of imports, then the container's global exports.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::AsyncResolvedAsSync`] if the key is bound as async
    /// - [`ResolveErrorKind::NotFound`] if no hop has it
    pub fn get_sync_factory(&self, key: &BindingKey) -> Result<SyncFactoryRef, ResolveErrorKind> {
        self.lookup_sync(key, &mut Visited::new())
    }

    /// Finds a factory for `key` for an async resolution.
    ///
    /// Each hop considers its async bindings, then its sync bindings.
    ///
    /// # Errors
    /// [`ResolveErrorKind::NotFound`] if no hop has it.
    pub fn get_async_factory(&self, key: &BindingKey) -> Result<AsyncFactoryRef, ResolveErrorKind> {
        self.lookup_async(key, &mut Visited::new())
    }

    pub(crate) fn lookup_sync(&self, key: &BindingKey, visited: &mut Visited) -> Result<SyncFactoryRef, ResolveErrorKind> {
        if !self.visit(key, visited) {
            return Err(self.not_found(key.clone()));
        }

        let (alias, imported) = {
            let bindings = self.inner.bindings.lock();
            if bindings.asynchronous.contains_key(key) {
                return Err(ResolveErrorKind::AsyncResolvedAsSync {
                    module: self.name().to_owned(),
                    key: key.clone(),
                });
            }
            if let Some(factory) = bindings.sync.get(key) {
                return Ok(FactoryRef {
                    owner: self.clone(),
                    factory: factory.clone(),
                });
            }
            (bindings.aliases.get(key).cloned(), bindings.imported())
        };

        if let Some(target) = alias {
            debug!(module = %self.name(), alias = %key, key = %target, "Following alias");
            return self.lookup_sync(&target, visited);
        }
        if let Some(found) = first_found(imported.iter().filter(|module| module.exports_key(key)), |module| {
            module.lookup_sync(key, visited)
        })? {
            return Ok(found);
        }

        match &self.inner.parent {
            Some(parent) => parent.lookup_sync(key, visited),
            None => match self.container() {
                Ok(container) => container.lookup_global_sync(key, visited).map_err(|err| {
                    if err.is_not_found() {
                        self.not_found(key.clone())
                    } else {
                        err
                    }
                }),
                Err(_) => Err(self.not_found(key.clone())),
            },
        }
    }

    pub(crate) fn lookup_async(&self, key: &BindingKey, visited: &mut Visited) -> Result<AsyncFactoryRef, ResolveErrorKind> {
        if !self.visit(key, visited) {
            return Err(self.not_found(key.clone()));
        }

        let (alias, imported) = {
            let bindings = self.inner.bindings.lock();
            if let Some(factory) = bindings.asynchronous.get(key) {
                return Ok(FactoryRef {
                    owner: self.clone(),
                    factory: AnyFactory::Async(factory.clone()),
                });
            }
            if let Some(factory) = bindings.sync.get(key) {
                return Ok(FactoryRef {
                    owner: self.clone(),
                    factory: AnyFactory::Sync(factory.clone()),
                });
            }
            (bindings.aliases.get(key).cloned(), bindings.imported())
        };

        if let Some(target) = alias {
            debug!(module = %self.name(), alias = %key, key = %target, "Following alias");
            return self.lookup_async(&target, visited);
        }
        if let Some(found) = first_found(imported.iter().filter(|module| module.exports_key(key)), |module| {
            module.lookup_async(key, visited)
        })? {
            return Ok(found);
        }

        match &self.inner.parent {
            Some(parent) => parent.lookup_async(key, visited),
            None => match self.container() {
                Ok(container) => container.lookup_global_async(key, visited).map_err(|err| {
                    if err.is_not_found() {
                        self.not_found(key.clone())
                    } else {
                        err
                    }
                }),
                Err(_) => Err(self.not_found(key.clone())),
            },
        }
    }

    /// Marks `(self, key)` visited. `false` if it already was.
    fn visit(&self, key: &BindingKey, visited: &mut Visited) -> bool {
        let entry = (self.id(), key.clone());
        if visited.contains(&entry) {
            return false;
        }
        visited.push(entry);
        true
    }

    fn reachable_keys<I, K>(&self, keys: I) -> Result<Vec<BindingKey>, BindingErrorKind>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyTerm>,
    {
        keys.into_iter()
            .map(|key| {
                let key = self.checked_key(key)?;
                if self.is_reachable(&key) {
                    Ok(key)
                } else {
                    Err(BindingErrorKind::ExportUnbound {
                        module: self.name().to_owned(),
                        key,
                    })
                }
            })
            .collect()
    }

    fn checked_key(&self, key: impl Into<KeyTerm>) -> Result<BindingKey, BindingErrorKind> {
        let key = key.into().resolve()?;
        if key.is_empty() {
            return Err(BindingErrorKind::EmptyKey);
        }
        Ok(key)
    }

    fn conflicting_style(&self, key: BindingKey, bound_as: BindingStyle, requested: BindingStyle) -> BindingErrorKind {
        let err = BindingErrorKind::ConflictingStyle {
            module: self.name().to_owned(),
            key,
            bound_as,
            requested,
        };
        error!("{}", err);
        err
    }

    fn ensure_not_fiber(&self, operation: &'static str) -> Result<(), BindingErrorKind> {
        if self.kind() == ModuleKind::Fiber {
            return Err(BindingErrorKind::FiberOperation {
                module: self.name().to_owned(),
                operation,
            });
        }
        Ok(())
    }

    #[inline]
    fn not_found(&self, key: BindingKey) -> ResolveErrorKind {
        ResolveErrorKind::NotFound {
            module: self.name().to_owned(),
            key,
        }
    }
}

/// Tries `lookup` on each candidate in order, skipping plain misses.
pub(crate) fn first_found<'a, F>(
    candidates: impl Iterator<Item = &'a Module>,
    mut lookup: impl FnMut(&'a Module) -> Result<F, ResolveErrorKind>,
) -> Result<Option<F>, ResolveErrorKind> {
    for candidate in candidates {
        match lookup(candidate) {
            Ok(found) => return Ok(Some(found)),
            Err(err) if err.is_not_found() => {
                debug!(module = %candidate.name(), "Not found in import");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

async fn run_init(module: Weak<ModuleInner>) -> Result<(), Arc<SetupErrorKind>> {
    let Some(inner) = module.upgrade() else {
        return Ok(());
    };
    let module = Module { inner };

    let result = match module.inner.setup.clone() {
        Some(setup) => setup(module.clone()).await,
        None => Ok(()),
    };

    let mut state = module.inner.init.lock();
    match result {
        Ok(()) => {
            *state = InitState::Done;
            debug!(module = %module.name(), "Module initialized");
            Ok(())
        }
        Err(err) => {
            *state = InitState::Pending;
            error!(module = %module.name(), "{}", err);
            Err(Arc::new(err))
        }
    }
}

impl Debug for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}
