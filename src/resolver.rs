use std::sync::Arc;

use crate::{
    any::{downcast, Value},
    config::ProvideOptions,
    context::ProvideContext,
    errors::ResolveErrorKind,
    key::{BindingKey, KeyTerm},
    module::{Module, PropertyValue},
};

/// Handle a factory resolves its dependencies through.
///
/// Dependencies are looked up in the module owning the binding, not in the
/// module that asked for it, and carry the provide chain forward. A binding
/// reached by a fiber through its parents resolves its dependencies in the
/// fiber, so per-call bindings of the fiber are visible to it.
#[derive(Clone, Debug)]
pub struct Resolver {
    scope: Module,
    requester: Module,
    ctx: ProvideContext,
}

impl Resolver {
    #[inline]
    #[must_use]
    pub(crate) const fn new(scope: Module, requester: Module, ctx: ProvideContext) -> Self {
        Self { scope, requester, ctx }
    }

    /// Module dependencies are resolved in: the binding's owner, or the fiber it was reached through.
    #[inline]
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.scope
    }

    /// Module the resolution was requested from.
    #[inline]
    #[must_use]
    pub fn requester(&self) -> &Module {
        &self.requester
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &ProvideContext {
        &self.ctx
    }

    /// # Errors
    /// See [`Module::provide_sync`].
    pub fn provide_sync<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        self.scope.provide_sync_in::<T>(key, Some(&self.ctx))
    }

    /// # Errors
    /// See [`Module::provide_async`].
    pub async fn provide_async<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Arc<T>, ResolveErrorKind> {
        self.scope.provide_async_in::<T>(key, Some(&self.ctx)).await
    }

    /// Optional resolution: `None` when nothing is bound under `key`.
    ///
    /// # Errors
    /// Any failure except a missing binding, or a value that isn't a `T`.
    pub fn try_provide_sync<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>) -> Result<Option<Arc<T>>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        self.provide_sync_with(key.clone(), ProvideOptions::optional())?
            .map(|value| cast(key, value))
            .transpose()
    }

    /// # Errors
    /// See [`Self::try_provide_sync`].
    pub async fn try_provide_async<T: Send + Sync + 'static>(
        &self,
        key: impl Into<KeyTerm>,
    ) -> Result<Option<Arc<T>>, ResolveErrorKind> {
        let key = key.into().resolve()?;
        self.provide_async_with(key.clone(), ProvideOptions::optional())
            .await?
            .map(|value| cast(key, value))
            .transpose()
    }

    #[inline]
    pub(crate) fn provide_sync_with(&self, key: BindingKey, options: ProvideOptions) -> Result<Option<Value>, ResolveErrorKind> {
        self.scope.provide_sync_with(key, options, Some(&self.ctx))
    }

    #[inline]
    pub(crate) async fn provide_async_with(&self, key: BindingKey, options: ProvideOptions) -> Result<Option<Value>, ResolveErrorKind> {
        self.scope.provide_async_with(key, options, Some(&self.ctx)).await
    }

    #[inline]
    pub(crate) fn provide_property_sync(&self, key: BindingKey, options: ProvideOptions) -> Result<PropertyValue, ResolveErrorKind> {
        self.scope.provide_property_sync(key, options, &self.ctx)
    }

    #[inline]
    pub(crate) async fn provide_property_async(
        &self,
        key: BindingKey,
        options: ProvideOptions,
    ) -> Result<PropertyValue, ResolveErrorKind> {
        self.scope.provide_property_async(key, options, &self.ctx).await
    }
}

pub(crate) fn cast<T: Send + Sync + 'static>(key: BindingKey, value: Value) -> Result<Arc<T>, ResolveErrorKind> {
    downcast::<T>(value).map_err(|actual| ResolveErrorKind::IncorrectType {
        key,
        expected: std::any::type_name::<T>(),
        actual,
    })
}
