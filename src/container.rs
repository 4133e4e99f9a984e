use futures::future::try_join_all;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Debug, Formatter},
    sync::{Arc, Weak},
};
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, Instrument as _};

use crate::{
    any::{TypeInfo, Value},
    config::ProvideOptions,
    errors::{BindingErrorKind, ResolveErrorKind, SetupErrorKind},
    factory::{AsyncFactoryRef, SyncFactoryRef},
    key::{BindingKey, KeyTerm},
    module::{first_found, Module, ModuleId, ModuleKind, ModuleSetup, ModuleTerm, Visited, WeakImporter},
    resolver::cast,
};

/// Upper bound on the container import chain walked by [`Container::import_container`].
pub const MAX_IMPORT_DEPTH: usize = 100;

#[derive(Default)]
struct Globals {
    refs: Vec<(Module, BTreeSet<BindingKey>)>,
    waiters: BTreeMap<BindingKey, Vec<oneshot::Sender<()>>>,
}

impl Globals {
    fn is_bound(&self, key: &BindingKey) -> bool {
        self.refs.iter().any(|(_, keys)| keys.contains(key))
    }

    fn owners(&self, key: &BindingKey) -> Vec<Module> {
        self.refs
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(module, _)| module.clone())
            .collect()
    }
}

pub(crate) struct ContainerInner {
    name: Arc<str>,
    modules: Mutex<BTreeMap<TypeInfo, Module>>,
    dynamic_modules: Mutex<Vec<Module>>,
    globals: Mutex<Globals>,
    /// Init wait-for edges `(waiter, target)`: `waiter`'s setup is waiting for `target`'s init.
    waits: Mutex<Vec<(ModuleId, ModuleId)>>,
    imports: Mutex<Vec<Container>>,
    importers: Mutex<Vec<Weak<ContainerInner>>>,
}

/// Root registry of modules and of the keys they export globally.
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::named("container")
    }

    #[must_use]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                name: name.into(),
                modules: Mutex::new(BTreeMap::new()),
                dynamic_modules: Mutex::new(Vec::new()),
                globals: Mutex::new(Globals::default()),
                waits: Mutex::new(Vec::new()),
                imports: Mutex::new(Vec::new()),
                importers: Mutex::new(Vec::new()),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers the default definition of `M` and initializes it.
    ///
    /// # Errors
    /// See [`Self::register_batch`].
    #[inline]
    pub async fn register<M: ModuleSetup + Default>(&self) -> Result<Module, SetupErrorKind> {
        self.register_term(ModuleTerm::new::<M>()).await
    }

    /// # Errors
    /// See [`Self::register_batch`].
    pub async fn register_term(&self, term: ModuleTerm) -> Result<Module, SetupErrorKind> {
        let mut modules = self.register_batch([term]).await?;
        modules.pop().ok_or_else(|| {
            SetupErrorKind::Custom(anyhow::anyhow!("registration of one module produced no module"))
        })
    }

    /// Registers modules, constructing all of them before initializing any.
    ///
    /// Regular modules are registered once per definition type; registering
    /// a type again returns the existing module. Dynamic modules are imported
    /// at root scope, a new instance each time. Initialization runs
    /// concurrently, with no ordering among the modules.
    ///
    /// Returns the modules in the order of `terms`.
    ///
    /// # Errors
    /// - [`BindingErrorKind::FiberImport`] for a fiber definition, before anything is constructed
    /// - The first failing module initialization
    pub async fn register_batch<I>(&self, terms: I) -> Result<Vec<Module>, SetupErrorKind>
    where
        I: IntoIterator<Item = ModuleTerm>,
    {
        self.register_batch_from(terms, None).await
    }

    pub(crate) async fn register_batch_from<I>(&self, terms: I, waiter: Option<ModuleId>) -> Result<Vec<Module>, SetupErrorKind>
    where
        I: IntoIterator<Item = ModuleTerm>,
    {
        let terms: Vec<ModuleTerm> = terms.into_iter().collect();
        if let Some(fiber) = terms.iter().find(|term| term.kind() == ModuleKind::Fiber) {
            let err = BindingErrorKind::FiberImport {
                module: fiber.type_info().name,
            };
            error!("{}", err);
            return Err(err.into());
        }

        let modules: Vec<Module> = terms.iter().map(|term| self.instantiate(term)).collect();
        try_join_all(modules.iter().map(|module| module.init_from(waiter))).await?;
        Ok(modules)
    }

    fn instantiate(&self, term: &ModuleTerm) -> Module {
        let weak = Arc::downgrade(&self.inner);
        match term.kind() {
            ModuleKind::Dynamic => {
                let module = Module::from_term(term, weak.clone());
                module.set_importer(WeakImporter::Container(weak));
                self.inner.dynamic_modules.lock().push(module.clone());
                module
            }
            ModuleKind::Regular | ModuleKind::Fiber => self
                .inner
                .modules
                .lock()
                .entry(term.type_info())
                .or_insert_with(|| Module::from_term(term, weak))
                .clone(),
        }
    }

    /// The registered module of definition type `M`.
    #[must_use]
    pub fn get_module<M: ModuleSetup>(&self) -> Option<Module> {
        self.inner.modules.lock().get(&TypeInfo::of::<M>()).cloned()
    }

    #[must_use]
    pub fn modules(&self) -> Vec<Module> {
        self.inner.modules.lock().values().cloned().collect()
    }

    /// Dynamic modules imported at root scope.
    #[must_use]
    pub fn dynamic_modules(&self) -> Vec<Module> {
        self.inner.dynamic_modules.lock().clone()
    }

    /// Records that `module` exports `key` container-wide and wakes its waiters.
    ///
    /// # Errors
    /// Returns [`BindingErrorKind::GlobalExportWithoutLocal`] unless `module` exports `key` already.
    pub fn register_global_binding_ref(&self, module: &Module, key: impl Into<KeyTerm>) -> Result<(), BindingErrorKind> {
        let key = key.into().resolve()?;
        if !module.exports().contains(&key) {
            let err = BindingErrorKind::GlobalExportWithoutLocal {
                module: module.name().to_owned(),
                key,
            };
            error!("{}", err);
            return Err(err);
        }

        {
            let mut globals = self.inner.globals.lock();
            match globals.refs.iter_mut().find(|(owner, _)| owner.id() == module.id()) {
                Some((_, keys)) => {
                    keys.insert(key.clone());
                }
                None => globals.refs.push((module.clone(), BTreeSet::from([key.clone()]))),
            }
        }
        debug!(module = %module.name(), key = %key, "Exported globally");

        self.release_waiters(&key);
        Ok(())
    }

    /// Wakes the waiters for `key` here and in every container importing this one.
    fn release_waiters(&self, key: &BindingKey) {
        for container in self.importer_closure() {
            let waiters = container.globals.lock().waiters.remove(key).unwrap_or_default();
            if waiters.is_empty() {
                continue;
            }
            debug!(container = %container.name, key = %key, waiters = waiters.len(), "Releasing global binding waiters");
            for waiter in waiters {
                // The waiting side may be gone already.
                let _ = waiter.send(());
            }
        }
    }

    /// This container and all containers importing it, transitively.
    fn importer_closure(&self) -> Vec<Arc<ContainerInner>> {
        let mut seen: Vec<Arc<ContainerInner>> = Vec::new();
        let mut stack = vec![self.inner.clone()];
        while let Some(node) = stack.pop() {
            if seen.iter().any(|known| Arc::ptr_eq(known, &node)) {
                continue;
            }
            stack.extend(node.importers.lock().iter().filter_map(Weak::upgrade));
            seen.push(node);
        }
        seen
    }

    /// Whether `key` is exported globally here or in an imported container.
    fn is_globally_bound(&self, key: &BindingKey) -> bool {
        let mut seen: Vec<*const ContainerInner> = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(container) = stack.pop() {
            if seen.contains(&Arc::as_ptr(&container.inner)) {
                continue;
            }
            seen.push(Arc::as_ptr(&container.inner));
            if container.inner.globals.lock().is_bound(key) {
                return true;
            }
            stack.extend(container.imported_containers());
        }
        false
    }

    /// Waits until every key is exported globally, here or in an imported container.
    ///
    /// # Errors
    /// Returns [`BindingErrorKind::WaitAborted`] if the container is dropped first.
    pub async fn wait_for_global_binding<I, K>(&self, keys: I) -> Result<(), BindingErrorKind>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyTerm>,
    {
        let keys = keys
            .into_iter()
            .map(|key| key.into().resolve())
            .collect::<Result<Vec<_>, _>>()?;

        let mut pending = Vec::new();
        {
            let mut globals = self.inner.globals.lock();
            for senders in globals.waiters.values_mut() {
                senders.retain(|sender| !sender.is_closed());
            }
            globals.waiters.retain(|_, senders| !senders.is_empty());

            for key in keys {
                if globals.is_bound(&key) {
                    continue;
                }
                let (sender, receiver) = oneshot::channel();
                globals.waiters.entry(key.clone()).or_default().push(sender);
                pending.push((key, receiver));
            }
        }
        // Registered before checking imports, so an export racing this check still wakes us.
        pending.retain(|(key, _)| !self.is_globally_bound(key));
        if pending.is_empty() {
            return Ok(());
        }
        debug!(pending = pending.len(), "Waiting for global bindings");

        for (key, receiver) in pending {
            if receiver.await.is_err() {
                let err = BindingErrorKind::WaitAborted {
                    container: self.name().to_owned(),
                    key,
                };
                error!("{}", err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Finds the sync factory of a globally exported key.
    ///
    /// # Errors
    /// [`ResolveErrorKind::NotFoundGlobal`] if no module exports `key` globally,
    /// here or in an imported container.
    pub fn get_sync_module_factory(&self, key: &BindingKey) -> Result<SyncFactoryRef, ResolveErrorKind> {
        self.lookup_global_sync(key, &mut Visited::new())
    }

    /// # Errors
    /// See [`Self::get_sync_module_factory`].
    pub fn get_async_module_factory(&self, key: &BindingKey) -> Result<AsyncFactoryRef, ResolveErrorKind> {
        self.lookup_global_async(key, &mut Visited::new())
    }

    pub(crate) fn lookup_global_sync(&self, key: &BindingKey, visited: &mut Visited) -> Result<SyncFactoryRef, ResolveErrorKind> {
        let owners = self.inner.globals.lock().owners(key);
        if let Some(found) = first_found(owners.iter(), |owner| owner.lookup_sync(key, visited))? {
            return Ok(found);
        }
        for container in self.imported_containers() {
            match container.lookup_global_sync(key, visited) {
                Ok(found) => return Ok(found),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Err(ResolveErrorKind::NotFoundGlobal { key: key.clone() })
    }

    pub(crate) fn lookup_global_async(&self, key: &BindingKey, visited: &mut Visited) -> Result<AsyncFactoryRef, ResolveErrorKind> {
        let owners = self.inner.globals.lock().owners(key);
        if let Some(found) = first_found(owners.iter(), |owner| owner.lookup_async(key, visited))? {
            return Ok(found);
        }
        for container in self.imported_containers() {
            match container.lookup_global_async(key, visited) {
                Ok(found) => return Ok(found),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Err(ResolveErrorKind::NotFoundGlobal { key: key.clone() })
    }

    /// Resolves a globally exported key through the module owning it.
    ///
    /// # Errors
    /// See [`Self::provide_sync_with`].
    pub fn provide_sync<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        match self.provide_sync_with(key.clone(), ProvideOptions::default())? {
            Some(value) => cast(key, value),
            None => Err(ResolveErrorKind::NotFoundGlobal { key }),
        }
    }

    /// # Errors
    /// See [`Self::provide_async_with`].
    pub async fn provide_async<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        match self.provide_async_with(key.clone(), ProvideOptions::default()).await? {
            Some(value) => cast(key, value),
            None => Err(ResolveErrorKind::NotFoundGlobal { key }),
        }
    }

    /// # Errors
    /// - [`ResolveErrorKind::NotFoundGlobal`] if no module exports `key` globally (unless optional)
    /// - Any error of [`Module::provide_sync_with`]
    pub fn provide_sync_with(&self, key: BindingKey, options: ProvideOptions) -> Result<Option<Value>, ResolveErrorKind> {
        let span = info_span!("provide", key = %key, container = %self.name());
        let _guard = span.enter();

        match self.get_sync_module_factory(&key) {
            Ok(found) => found.owner.provide_sync_with(key, options, None),
            Err(err) if options.optional && err.is_not_found() => {
                debug!("Optional global binding not found");
                Ok(None)
            }
            Err(err) => {
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// # Errors
    /// - [`ResolveErrorKind::NotFoundGlobal`] if no module exports `key` globally (unless optional)
    /// - Any error of [`Module::provide_async_with`]
    pub async fn provide_async_with(&self, key: BindingKey, options: ProvideOptions) -> Result<Option<Value>, ResolveErrorKind> {
        let span = info_span!("provide_async", key = %key, container = %self.name());

        async {
            match self.get_async_module_factory(&key) {
                Ok(found) => found.owner.provide_async_with(key, options, None).await,
                Err(err) if options.optional && err.is_not_found() => {
                    debug!("Optional global binding not found");
                    Ok(None)
                }
                Err(err) => {
                    error!("{}", err);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Makes `child`'s global exports resolvable through this container.
    ///
    /// Walks up from this container through its importers: meeting `child`
    /// means the import would close a cycle. Re-convergent (diamond) import
    /// graphs are accepted.
    ///
    /// # Errors
    /// - [`BindingErrorKind::ImportCycle`] if `child` is this container or one of its importers
    /// - [`BindingErrorKind::ImportDepthExceeded`] if the importer chain is deeper than [`MAX_IMPORT_DEPTH`]
    pub fn import_container(&self, child: &Container) -> Result<(), BindingErrorKind> {
        let cycle = || BindingErrorKind::ImportCycle {
            parent: self.name().to_owned(),
            child: child.name().to_owned(),
        };

        let mut seen: Vec<*const ContainerInner> = Vec::new();
        let mut stack = vec![(self.inner.clone(), 0_usize)];
        while let Some((node, depth)) = stack.pop() {
            if Arc::ptr_eq(&node, &child.inner) {
                let err = cycle();
                error!("{}", err);
                return Err(err);
            }
            if depth >= MAX_IMPORT_DEPTH {
                let err = BindingErrorKind::ImportDepthExceeded { limit: MAX_IMPORT_DEPTH };
                error!("{}", err);
                return Err(err);
            }
            if seen.contains(&Arc::as_ptr(&node)) {
                continue;
            }
            seen.push(Arc::as_ptr(&node));

            let importers: Vec<Arc<ContainerInner>> = node.importers.lock().iter().filter_map(Weak::upgrade).collect();
            stack.extend(importers.into_iter().map(|importer| (importer, depth + 1)));
        }

        {
            let mut imports = self.inner.imports.lock();
            if imports.iter().any(|imported| Arc::ptr_eq(&imported.inner, &child.inner)) {
                return Ok(());
            }
            imports.push(child.clone());
        }
        child.inner.importers.lock().push(Arc::downgrade(&self.inner));
        debug!(parent = %self.name(), child = %child.name(), "Container imported");

        for key in child.global_keys() {
            self.release_waiters(&key);
        }
        Ok(())
    }

    /// Keys exported globally here or in an imported container.
    fn global_keys(&self) -> BTreeSet<BindingKey> {
        let mut keys = BTreeSet::new();
        let mut seen: Vec<*const ContainerInner> = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(container) = stack.pop() {
            if seen.contains(&Arc::as_ptr(&container.inner)) {
                continue;
            }
            seen.push(Arc::as_ptr(&container.inner));
            keys.extend(container.inner.globals.lock().refs.iter().flat_map(|(_, bound)| bound.iter().cloned()));
            stack.extend(container.imported_containers());
        }
        keys
    }

    #[inline]
    fn imported_containers(&self) -> Vec<Container> {
        self.inner.imports.lock().clone()
    }

    /// Records that `waiter`'s setup waits for `target`'s init.
    ///
    /// `None` if `target` already (transitively) waits for `waiter`, as waiting would never end.
    pub(crate) fn begin_wait(&self, waiter: ModuleId, target: ModuleId) -> Option<WaitGuard> {
        let mut waits = self.inner.waits.lock();
        if waiter == target || reaches(&waits, target, waiter) {
            return None;
        }
        waits.push((waiter, target));
        Some(WaitGuard {
            container: Arc::downgrade(&self.inner),
            edge: (waiter, target),
        })
    }
}

fn reaches(edges: &[(ModuleId, ModuleId)], from: ModuleId, to: ModuleId) -> bool {
    let mut stack = vec![from];
    let mut seen = Vec::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if seen.contains(&node) {
            continue;
        }
        seen.push(node);
        stack.extend(edges.iter().filter(|(waiter, _)| *waiter == node).map(|(_, target)| *target));
    }
    false
}

/// Removes its wait-for edge when the wait ends, completed or not.
pub(crate) struct WaitGuard {
    container: Weak<ContainerInner>,
    edge: (ModuleId, ModuleId),
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if let Some(container) = self.container.upgrade() {
            let mut waits = container.waits.lock();
            if let Some(index) = waits.iter().position(|edge| *edge == self.edge) {
                waits.swap_remove(index);
            }
        }
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.name)
            .field("modules", &self.inner.modules.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Container, MAX_IMPORT_DEPTH};
    use crate::{
        config::ProvideOptions,
        errors::{BindingErrorKind, ResolveErrorKind, SetupErrorKind},
        key::BindingKey,
        Module, ModuleKind, ModuleSetup, ModuleTerm,
    };

    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Database;

    #[async_trait::async_trait]
    impl ModuleSetup for Database {
        async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
            module.bind().constant("db:url", String::from("postgres://"))?;
            module.bind().constant("db:pool", 4_u8)?;
            module.export_global(["db:url"])?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Reports;

    #[async_trait::async_trait]
    impl ModuleSetup for Reports {
        async fn setup(&self, _module: &Module) -> Result<(), SetupErrorKind> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Request;

    #[async_trait::async_trait]
    impl ModuleSetup for Request {
        const KIND: ModuleKind = ModuleKind::Fiber;

        async fn setup(&self, _module: &Module) -> Result<(), SetupErrorKind> {
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_global_exports() {
        let container = Container::new();
        let modules = container
            .register_batch([ModuleTerm::new::<Reports>(), ModuleTerm::new::<Database>()])
            .await
            .unwrap();

        assert_eq!(container.provide_sync::<String>("db:url").unwrap().as_str(), "postgres://");
        assert_eq!(modules[0].provide_sync::<String>("db:url").unwrap().as_str(), "postgres://");
        assert!(matches!(
            container.provide_sync::<u8>("db:pool"),
            Err(ResolveErrorKind::NotFoundGlobal { .. })
        ));
        assert!(modules[0].provide_sync::<u8>("db:pool").unwrap_err().is_not_found());
        assert!(container
            .provide_sync_with(BindingKey::name("db:pool"), ProvideOptions::optional())
            .unwrap()
            .is_none());
        assert_eq!(
            *container.provide_async::<String>("db:url").await.unwrap(),
            "postgres://"
        );
        assert_eq!(container.modules().len(), 2);
        assert!(container.get_module::<Database>().unwrap().ptr_eq(&modules[1]));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_global_export_requires_local_export() {
        let container = Container::new();
        let database = container.register::<Database>().await.unwrap();

        assert!(matches!(
            container.register_global_binding_ref(&database, "db:pool"),
            Err(BindingErrorKind::GlobalExportWithoutLocal { .. })
        ));
        database.export(["db:pool"]).unwrap();
        container.register_global_binding_ref(&database, "db:pool").unwrap();
        assert_eq!(*container.provide_sync::<u8>("db:pool").unwrap(), 4);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_for_global_binding() {
        let container = Container::new();

        let waiter = tokio::spawn({
            let container = container.clone();
            async move { container.wait_for_global_binding(["db:url"]).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        container.register::<Database>().await.unwrap();
        waiter.await.unwrap().unwrap();

        // Already bound keys don't wait.
        container.wait_for_global_binding(["db:url"]).await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_sees_imported_container_globals() {
        let parent = Container::named("parent");
        let child = Container::named("child");
        child.register::<Database>().await.unwrap();
        parent.import_container(&child).unwrap();

        assert_eq!(parent.provide_sync::<String>("db:url").unwrap().as_str(), "postgres://");
        timeout(Duration::from_secs(1), parent.wait_for_global_binding(["db:url"]))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_released_by_imported_container() {
        let parent = Container::named("parent");
        let child = Container::named("child");
        parent.import_container(&child).unwrap();

        let waiter = tokio::spawn({
            let parent = parent.clone();
            async move { parent.wait_for_global_binding(["db:url"]).await }
        });
        tokio::task::yield_now().await;

        child.register::<Database>().await.unwrap();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_released_by_import() {
        let parent = Container::named("parent");
        let child = Container::named("child");
        child.register::<Database>().await.unwrap();

        let waiter = tokio::spawn({
            let parent = parent.clone();
            async move { parent.wait_for_global_binding(["db:url"]).await }
        });
        tokio::task::yield_now().await;

        parent.import_container(&child).unwrap();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_abandoned_waiters_pruned() {
        let container = Container::new();

        for _ in 0..3 {
            let waited = timeout(Duration::from_millis(10), container.wait_for_global_binding(["never"])).await;
            assert!(waited.is_err());
        }
        assert_eq!(container.inner.globals.lock().waiters.get(&BindingKey::name("never")).map(Vec::len), Some(1));

        container.register::<Database>().await.unwrap();
        container.wait_for_global_binding(["db:url"]).await.unwrap();
        assert!(container.inner.globals.lock().waiters.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fiber_definitions_rejected() {
        let container = Container::new();

        assert!(matches!(
            container.register::<Request>().await,
            Err(SetupErrorKind::Binding(BindingErrorKind::FiberImport { .. }))
        ));
        assert!(container.modules().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_imported_container_globals() {
        let parent = Container::named("parent");
        let child = Container::named("child");
        child.register::<Database>().await.unwrap();
        let reports = parent.register::<Reports>().await.unwrap();

        assert!(reports.provide_sync::<String>("db:url").is_err());
        parent.import_container(&child).unwrap();
        assert_eq!(reports.provide_sync::<String>("db:url").unwrap().as_str(), "postgres://");
    }

    #[test]
    #[traced_test]
    fn test_import_cycles_rejected() {
        let a = Container::named("a");
        let b = Container::named("b");
        let c = Container::named("c");

        assert!(matches!(a.import_container(&a), Err(BindingErrorKind::ImportCycle { .. })));

        a.import_container(&b).unwrap();
        b.import_container(&c).unwrap();
        assert!(matches!(c.import_container(&a), Err(BindingErrorKind::ImportCycle { .. })));
        assert!(matches!(b.import_container(&a), Err(BindingErrorKind::ImportCycle { .. })));
    }

    #[test]
    #[traced_test]
    fn test_diamond_import_allowed() {
        let root = Container::named("root");
        let left = Container::named("left");
        let right = Container::named("right");
        let shared = Container::named("shared");

        root.import_container(&left).unwrap();
        root.import_container(&right).unwrap();
        left.import_container(&shared).unwrap();
        right.import_container(&shared).unwrap();

        assert!(matches!(
            shared.import_container(&root),
            Err(BindingErrorKind::ImportCycle { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_import_depth_bound() {
        let chain: Vec<Container> = (0..=MAX_IMPORT_DEPTH + 1).map(|index| Container::named(format!("c{index}"))).collect();
        let mut result = Ok(());
        for pair in chain.windows(2) {
            result = pair[0].import_container(&pair[1]);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(BindingErrorKind::ImportDepthExceeded { limit: MAX_IMPORT_DEPTH })));
    }
}
