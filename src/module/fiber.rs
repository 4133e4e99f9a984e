use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::{Bindings, InitState, Module, ModuleId, ModuleInner, ModuleKind};

/// The module a fiber was created from, bound in every fiber.
#[derive(Clone, Debug)]
pub struct ParentModule(pub Module);

impl Module {
    /// Creates a per-call scope over this module.
    ///
    /// Bindings added to the fiber shadow this module's bindings for lookups
    /// made through the fiber only; a lookup miss falls through to this module.
    /// The fiber isn't registered anywhere and is gone once dropped.
    #[must_use]
    pub fn create_fiber(&self, name: impl Into<Arc<str>>) -> Module {
        let fiber = Module {
            inner: Arc::new(ModuleInner {
                id: ModuleId::next(),
                name: name.into(),
                type_info: None,
                kind: ModuleKind::Fiber,
                config: None,
                setup: None,
                container: self.inner.container.clone(),
                parent: Some(self.clone()),
                importer: Mutex::new(None),
                bindings: Mutex::new(Bindings::default()),
                init: Mutex::new(InitState::Done),
            }),
        };
        fiber.apply_default_bindings();
        debug!(module = %fiber.name(), parent = %self.name(), "Fiber created");
        fiber
    }

    /// Parent of a fiber, `None` for other modules.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&Module> {
        self.inner.parent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::ParentModule;
    use crate::{
        errors::BindingErrorKind, BindingKey, Config, Container, Module, ModuleKind, ModuleSetup, ModuleTerm, Resolver, SetupErrorKind,
    };

    use tracing_test::traced_test;

    #[derive(Default)]
    struct Http;

    #[async_trait::async_trait]
    impl ModuleSetup for Http {
        async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
            module.bind().constant("handler", "parent")?;
            module.bind().constant("request:id", 0_u64)?;
            module.bind().sync_functional_with("request:echo", Config::transient(), |resolver: &Resolver| {
                Ok(*resolver.provide_sync::<u64>("request:id")?)
            })?;
            module.bind().sync_functional_with("request:scope", Config::transient(), |resolver: &Resolver| {
                let current = resolver.provide_sync::<Module>(BindingKey::of::<Module>())?;
                Ok(current.name().to_owned())
            })?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Logger;

    #[async_trait::async_trait]
    impl ModuleSetup for Logger {
        const KIND: ModuleKind = ModuleKind::Dynamic;

        async fn setup(&self, _module: &Module) -> Result<(), SetupErrorKind> {
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fiber_shadows_parent() {
        let container = Container::new();
        let http = container.register::<Http>().await.unwrap();

        let fiber = http.create_fiber("request");
        fiber.bind().constant("handler", "fiber").unwrap();

        assert_eq!(*fiber.provide_sync::<&str>("handler").unwrap(), "fiber");
        assert_eq!(*http.provide_sync::<&str>("handler").unwrap(), "parent");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fiber_default_bindings() {
        let container = Container::new();
        let http = container.register::<Http>().await.unwrap();
        let fiber = http.create_fiber("request");

        let current = fiber.provide_sync::<Module>(crate::BindingKey::of::<Module>()).unwrap();
        assert!(current.ptr_eq(&fiber));

        let parent = fiber.provide_sync::<ParentModule>(crate::BindingKey::of::<ParentModule>()).unwrap();
        assert!(parent.0.ptr_eq(&http));
        assert!(fiber.parent().unwrap().ptr_eq(&http));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_parent_bindings_resolve_in_fiber() {
        let container = Container::new();
        let http = container.register::<Http>().await.unwrap();
        let fiber = http.create_fiber("request-42");
        fiber.bind().constant("request:id", 42_u64).unwrap();

        assert_eq!(*fiber.provide_sync::<u64>("request:echo").unwrap(), 42);
        assert_eq!(*http.provide_sync::<u64>("request:echo").unwrap(), 0);
        assert_eq!(*fiber.provide_async::<u64>("request:echo").await.unwrap(), 42);

        assert_eq!(fiber.provide_sync::<String>("request:scope").unwrap().as_str(), "request-42");
        assert_eq!(http.provide_sync::<String>("request:scope").unwrap().as_str(), "Http");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fiber_restrictions() {
        let container = Container::new();
        let http = container.register::<Http>().await.unwrap();
        let fiber = http.create_fiber("request");
        fiber.bind().constant("local", 1_u8).unwrap();

        assert!(matches!(fiber.export(["local"]), Err(BindingErrorKind::FiberOperation { .. })));
        assert!(matches!(
            fiber.export_global(["local"]),
            Err(BindingErrorKind::FiberOperation { .. })
        ));
        assert!(matches!(
            fiber.import([ModuleTerm::new::<Logger>()]).await,
            Err(SetupErrorKind::Binding(BindingErrorKind::FiberOperation { .. }))
        ));
    }
}
