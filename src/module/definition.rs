use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};
use std::{
    borrow::Cow,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use super::Module;
use crate::{
    any::{TypeInfo, Value},
    errors::SetupErrorKind,
};

/// How a module participates in the module graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// One instance per container, shared by every importer.
    Regular,
    /// A fresh instance per import, owned by its importer.
    Dynamic,
    /// Per-call scope layered over a parent module. Never registered or imported.
    Fiber,
}

/// Module definition: declares the module's bindings, imports and exports.
///
/// The definition value doubles as the module's configuration; it's bound
/// under its own type key and returned by [`Module::config`].
///
/// ```rust
/// use modwire::{Module, ModuleSetup, SetupErrorKind};
///
/// #[derive(Default)]
/// struct Database {
///     url: String,
/// }
///
/// #[modwire::async_trait]
/// impl ModuleSetup for Database {
///     async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
///         module.bind().constant("db:url", self.url.clone())?;
///         module.export(["db:url"])?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ModuleSetup: Send + Sync + 'static {
    const KIND: ModuleKind = ModuleKind::Regular;

    /// Name used in errors and provide chains.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(TypeInfo::of::<Self>().short_name())
    }

    /// # Errors
    /// Any configuration error aborts the module's initialization.
    async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind>;
}

pub(crate) type SetupFn = Arc<dyn Fn(Module) -> BoxFuture<'static, Result<(), SetupErrorKind>> + Send + Sync>;

/// A module definition ready to be registered or imported.
#[derive(Clone)]
pub struct ModuleTerm {
    pub(crate) type_info: TypeInfo,
    pub(crate) kind: ModuleKind,
    pub(crate) name: Cow<'static, str>,
    pub(crate) config: Value,
    pub(crate) setup: SetupFn,
}

impl ModuleTerm {
    /// Term for the default definition of `M`.
    #[inline]
    #[must_use]
    pub fn new<M: ModuleSetup + Default>() -> Self {
        Self::with(M::default())
    }

    #[must_use]
    pub fn with<M: ModuleSetup>(definition: M) -> Self {
        let definition = Arc::new(definition);
        Self {
            type_info: TypeInfo::of::<M>(),
            kind: M::KIND,
            name: definition.name(),
            config: definition.clone(),
            setup: Arc::new(move |module| {
                let definition = definition.clone();
                async move { definition.setup(&module).await }.boxed()
            }),
        }
    }

    /// Term for the default definition of `M`, adjusted by `configure`.
    #[must_use]
    pub fn configure<M: ModuleSetup + Default>(configure: impl FnOnce(&mut M)) -> Self {
        let mut definition = M::default();
        configure(&mut definition);
        Self::with(definition)
    }

    #[inline]
    #[must_use]
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for ModuleTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleTerm")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
