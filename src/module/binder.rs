use std::{future::Future, sync::Arc};

use super::Module;
use crate::{
    config::Config,
    errors::{BindingErrorKind, InstantiateErrorKind},
    factory::{AsyncFunctionalFactory, AsyncSingletonClassFactory, ConstantFactory, FunctionalFactory, SingletonClassFactory},
    injection::Injectable,
    key::{BindingKey, KeyTerm},
    resolver::Resolver,
};

/// Shorthands for binding the common factory kinds into a module.
///
/// Factories with hooks are bound with [`Module::bind_sync`] / [`Module::bind_async`].
pub struct Binder<'a> {
    module: &'a Module,
}

impl<'a> Binder<'a> {
    #[inline]
    pub(crate) const fn new(module: &'a Module) -> Self {
        Self { module }
    }

    /// Binds `T` under its own type key as a sync singleton.
    ///
    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn sync_singleton_class<T: Injectable>(&self) -> Result<(), BindingErrorKind> {
        self.sync_singleton_class_as::<T>(BindingKey::of::<T>())
    }

    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn sync_singleton_class_as<T: Injectable>(&self, key: impl Into<KeyTerm>) -> Result<(), BindingErrorKind> {
        self.module.bind_sync(key, SingletonClassFactory::<T>::new())
    }

    /// Binds `T` under its own type key as an async singleton.
    ///
    /// # Errors
    /// See [`Module::bind_async`].
    #[inline]
    pub fn singleton_class<T: Injectable>(&self) -> Result<(), BindingErrorKind> {
        self.singleton_class_as::<T>(BindingKey::of::<T>())
    }

    /// # Errors
    /// See [`Module::bind_async`].
    #[inline]
    pub fn singleton_class_as<T: Injectable>(&self, key: impl Into<KeyTerm>) -> Result<(), BindingErrorKind> {
        self.module.bind_async(key, AsyncSingletonClassFactory::<T>::new())
    }

    /// Binds a cached sync function.
    ///
    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn sync_functional<T, F>(&self, key: impl Into<KeyTerm>, f: F) -> Result<(), BindingErrorKind>
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        self.sync_functional_with(key, Config::default(), f)
    }

    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn sync_functional_with<T, F>(&self, key: impl Into<KeyTerm>, config: Config, f: F) -> Result<(), BindingErrorKind>
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        self.module.bind_sync(key, FunctionalFactory::with_config(f, config))
    }

    /// Binds a cached async function.
    ///
    /// # Errors
    /// See [`Module::bind_async`].
    #[inline]
    pub fn functional<T, F, Fut>(&self, key: impl Into<KeyTerm>, f: F) -> Result<(), BindingErrorKind>
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InstantiateErrorKind>> + Send + 'static,
    {
        self.functional_with(key, Config::default(), f)
    }

    /// # Errors
    /// See [`Module::bind_async`].
    #[inline]
    pub fn functional_with<T, F, Fut>(&self, key: impl Into<KeyTerm>, config: Config, f: F) -> Result<(), BindingErrorKind>
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, InstantiateErrorKind>> + Send + 'static,
    {
        self.module.bind_async(key, AsyncFunctionalFactory::with_config(f, config))
    }

    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn constant<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>, value: T) -> Result<(), BindingErrorKind> {
        self.module.bind_sync(key, ConstantFactory::new(value))
    }

    /// # Errors
    /// See [`Module::bind_sync`].
    #[inline]
    pub fn shared<T: Send + Sync + 'static>(&self, key: impl Into<KeyTerm>, value: Arc<T>) -> Result<(), BindingErrorKind> {
        self.module.bind_sync(key, ConstantFactory::from_arc(value))
    }
}
