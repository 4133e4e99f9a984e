use futures::future::try_join_all;
use once_cell::sync::OnceCell;
use std::{
    any::{type_name, TypeId},
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use tracing::{debug, error};

use crate::{
    any::{downcast, TypeInfo, Value},
    config::ProvideOptions,
    context::ProvideContext,
    errors::{InjectionError, InjectionTarget, InstantiateErrorKind, ResolveErrorKind},
    key::{BindingKey, KeyTerm},
    module::{Module, PropertyValue},
    resolver::Resolver,
};

/// A class whose construction the container drives.
///
/// The returned [`Injection`] is the class's injection metadata: how to build
/// it from resolved constructor arguments, and which properties and method
/// parameters are filled from bindings.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn injection() -> Injection<Self>;
}

/// Declared parameter of a constructor or method.
#[derive(Clone, Debug)]
pub struct Param {
    name: &'static str,
    key: KeyTerm,
    options: ProvideOptions,
}

impl Param {
    #[inline]
    #[must_use]
    pub fn new(name: &'static str, key: impl Into<KeyTerm>) -> Self {
        Self {
            name,
            key: key.into(),
            options: ProvideOptions::default(),
        }
    }

    /// Parameter receiving `None` when nothing is bound under its key.
    #[inline]
    #[must_use]
    pub fn optional(name: &'static str, key: impl Into<KeyTerm>) -> Self {
        Self {
            name,
            key: key.into(),
            options: ProvideOptions::optional(),
        }
    }
}

type Constructor<T> = Arc<dyn Fn(Arguments) -> Result<T, InstantiateErrorKind> + Send + Sync>;
type Assign<T> = Arc<dyn Fn(&T, Value) -> Result<(), TypeId> + Send + Sync>;

struct Property<T> {
    name: &'static str,
    key: KeyTerm,
    options: ProvideOptions,
    expected: &'static str,
    assign: Assign<T>,
}

struct Method {
    name: &'static str,
    params: Vec<Param>,
}

/// Injection metadata of a class.
///
/// ```rust
/// use modwire::{Injectable, Injected, Injection};
///
/// struct Repo;
///
/// struct Service {
///     repo: std::sync::Arc<Repo>,
///     audit: Injected<String>,
/// }
///
/// impl Injectable for Service {
///     fn injection() -> Injection<Self> {
///         Injection::new(|mut args| {
///             Ok(Service {
///                 repo: args.take()?,
///                 audit: Injected::new(),
///             })
///         })
///         .arg("repo", modwire::BindingKey::of::<Repo>())
///         .property("audit", "audit", |service: &Service| &service.audit)
///     }
/// }
/// ```
pub struct Injection<T> {
    class: TypeInfo,
    constructor: Constructor<T>,
    params: Vec<Param>,
    properties: Vec<Property<T>>,
    methods: Vec<Method>,
}

impl<T: Send + Sync + 'static> Injection<T> {
    #[must_use]
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(Arguments) -> Result<T, InstantiateErrorKind> + Send + Sync + 'static,
    {
        Self {
            class: TypeInfo::of::<T>(),
            constructor: Arc::new(constructor),
            params: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Declares the next constructor parameter.
    #[inline]
    #[must_use]
    pub fn arg(mut self, name: &'static str, key: impl Into<KeyTerm>) -> Self {
        self.params.push(Param::new(name, key));
        self
    }

    #[inline]
    #[must_use]
    pub fn optional_arg(mut self, name: &'static str, key: impl Into<KeyTerm>) -> Self {
        self.params.push(Param::optional(name, key));
        self
    }

    /// Declares a property filled after construction.
    ///
    /// Properties may point back at classes still being constructed,
    /// which makes them the way to break constructor cycles.
    #[must_use]
    pub fn property<U, F>(self, name: &'static str, key: impl Into<KeyTerm>, field: F) -> Self
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> &Injected<U> + Send + Sync + 'static,
    {
        self.push_property(name, key.into(), ProvideOptions::default(), field)
    }

    #[must_use]
    pub fn optional_property<U, F>(self, name: &'static str, key: impl Into<KeyTerm>, field: F) -> Self
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> &Injected<U> + Send + Sync + 'static,
    {
        self.push_property(name, key.into(), ProvideOptions::optional(), field)
    }

    /// Declares the parameters of a method invoked with injected arguments.
    #[must_use]
    pub fn method(mut self, name: &'static str, params: impl IntoIterator<Item = Param>) -> Self {
        self.methods.push(Method {
            name,
            params: params.into_iter().collect(),
        });
        self
    }

    #[inline]
    #[must_use]
    pub fn class(&self) -> TypeInfo {
        self.class
    }

    fn push_property<U, F>(mut self, name: &'static str, key: KeyTerm, options: ProvideOptions, field: F) -> Self
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> &Injected<U> + Send + Sync + 'static,
    {
        self.properties.push(Property {
            name,
            key,
            options,
            expected: type_name::<U>(),
            assign: Arc::new(move |instance: &T, value: Value| -> Result<(), TypeId> {
                field(instance).set(downcast::<U>(value)?);
                Ok(())
            }),
        });
        self
    }
}

impl<T: Send + Sync + 'static> Injection<T> {
    pub(crate) fn constructor_arguments_sync(&self, resolver: &Resolver) -> Result<Arguments, ResolveErrorKind> {
        resolve_params_sync(self.class, &self.params, resolver, |index, name| InjectionTarget::ConstructorArg {
            index,
            name,
        })
    }

    pub(crate) async fn constructor_arguments_async(&self, resolver: &Resolver) -> Result<Arguments, ResolveErrorKind> {
        resolve_params_async(self.class, &self.params, resolver, |index, name| InjectionTarget::ConstructorArg {
            index,
            name,
        })
        .await
    }

    pub(crate) fn construct(&self, arguments: Arguments) -> Result<T, ResolveErrorKind> {
        (self.constructor)(arguments).map_err(|err| {
            let err = ResolveErrorKind::from(err);
            error!("{}", err);
            err
        })
    }

    /// Fills the properties of `instance`.
    ///
    /// A property whose target is being provided further up the chain is
    /// assigned once that provide call has its value.
    pub(crate) fn inject_properties_sync(&self, instance: &Arc<T>, resolver: &Resolver) -> Result<(), ResolveErrorKind> {
        for property in &self.properties {
            let key = property.key.resolve()?;
            let value = resolver
                .provide_property_sync(key.clone(), property.options)
                .map_err(|err| self.wrap_property(err, property, &key, resolver.context()))?;
            self.place(instance, property, key, value, resolver.context())?;
        }
        Ok(())
    }

    pub(crate) async fn inject_properties_async(&self, instance: &Arc<T>, resolver: &Resolver) -> Result<(), ResolveErrorKind> {
        for property in &self.properties {
            let key = property.key.resolve()?;
            let value = resolver
                .provide_property_async(key.clone(), property.options)
                .await
                .map_err(|err| self.wrap_property(err, property, &key, resolver.context()))?;
            self.place(instance, property, key, value, resolver.context())?;
        }
        Ok(())
    }

    fn place(
        &self,
        instance: &Arc<T>,
        property: &Property<T>,
        key: BindingKey,
        value: PropertyValue,
        ctx: &ProvideContext,
    ) -> Result<(), ResolveErrorKind> {
        let target = match value {
            PropertyValue::Ready(value) => return self.assign(instance, property, key, value, ctx),
            PropertyValue::Upstream(target) => target,
        };

        let instance = instance.clone();
        let assign = property.assign.clone();
        let (class, name, expected) = (self.class, property.name, property.expected);
        let chain = ctx.render();
        ctx.defer(
            target,
            Box::new(move |value: Value| {
                assign(instance.as_ref(), value).map_err(|actual| {
                    let err = ResolveErrorKind::IncorrectType {
                        key: key.clone(),
                        expected,
                        actual,
                    };
                    wrap_with_chain(err, class, InjectionTarget::Property { name }, &key, chain)
                })
            }),
        );
        Ok(())
    }

    pub(crate) fn circular_error(&self, resolver: &Resolver) -> ResolveErrorKind {
        let key = resolver
            .context()
            .chain()
            .last()
            .map_or_else(|| BindingKey::Type(self.class), |hop| hop.key().clone());
        ResolveErrorKind::CircularDependency(Box::new(InjectionError::new(
            format!(
                "Circular dependency detected while constructing {}. \
                Inject one side of the cycle as a property to break it",
                self.class.short_name()
            ),
            self.class.short_name(),
            InjectionTarget::Constructor,
            key,
            resolver.context().render(),
            None,
        )))
    }

    fn method_params(&self, method: &str) -> Result<(&'static str, &[Param]), ResolveErrorKind> {
        self.methods
            .iter()
            .find(|declared| declared.name == method)
            .map(|declared| (declared.name, declared.params.as_slice()))
            .ok_or_else(|| ResolveErrorKind::UnknownMethod {
                class: self.class.short_name(),
                method: method.to_owned(),
            })
    }

    fn assign(
        &self,
        instance: &T,
        property: &Property<T>,
        key: BindingKey,
        value: Option<Value>,
        ctx: &ProvideContext,
    ) -> Result<(), ResolveErrorKind> {
        let Some(value) = value else {
            debug!(property = property.name, "Optional property left empty");
            return Ok(());
        };
        (property.assign)(instance, value).map_err(|actual| {
            let err = ResolveErrorKind::IncorrectType {
                key: key.clone(),
                expected: property.expected,
                actual,
            };
            self.wrap_property(err, property, &key, ctx)
        })
    }

    fn wrap_property(&self, err: ResolveErrorKind, property: &Property<T>, key: &BindingKey, ctx: &ProvideContext) -> ResolveErrorKind {
        wrap(err, self.class, InjectionTarget::Property { name: property.name }, key, ctx)
    }
}

/// Adds class, target and chain context to an injection failure, once.
fn wrap(err: ResolveErrorKind, class: TypeInfo, target: InjectionTarget, key: &BindingKey, ctx: &ProvideContext) -> ResolveErrorKind {
    if err.is_injection() {
        return err;
    }
    wrap_with_chain(err, class, target, key, ctx.render())
}

fn wrap_with_chain(err: ResolveErrorKind, class: TypeInfo, target: InjectionTarget, key: &BindingKey, chain: String) -> ResolveErrorKind {
    let err = ResolveErrorKind::Injection(Box::new(InjectionError::new(
        format!("Failed to inject {key}"),
        class.short_name(),
        target,
        key.clone(),
        chain,
        Some(err),
    )));
    error!("{}", err);
    err
}

fn resolve_params_sync(
    class: TypeInfo,
    params: &[Param],
    resolver: &Resolver,
    target: impl Fn(usize, &'static str) -> InjectionTarget,
) -> Result<Arguments, ResolveErrorKind> {
    let mut arguments = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let key = param.key.resolve()?;
        let value = resolver
            .provide_sync_with(key.clone(), param.options)
            .map_err(|err| wrap(err, class, target(index, param.name), &key, resolver.context()))?;
        arguments.push(Argument {
            name: param.name,
            key,
            value,
        });
    }
    Ok(Arguments::new(class, arguments))
}

/// Resolves all parameters concurrently; the result keeps declaration order.
async fn resolve_params_async(
    class: TypeInfo,
    params: &[Param],
    resolver: &Resolver,
    target: impl Fn(usize, &'static str) -> InjectionTarget,
) -> Result<Arguments, ResolveErrorKind> {
    let keys = params
        .iter()
        .map(|param| param.key.resolve())
        .collect::<Result<Vec<_>, _>>()?;
    let target = &target;

    let values = try_join_all(params.iter().zip(&keys).enumerate().map(|(index, (param, key))| async move {
        resolver
            .provide_async_with(key.clone(), param.options)
            .await
            .map_err(|err| wrap(err, class, target(index, param.name), key, resolver.context()))
    }))
    .await?;

    let arguments = params
        .iter()
        .zip(keys)
        .zip(values)
        .map(|((param, key), value)| Argument {
            name: param.name,
            key,
            value,
        })
        .collect();
    Ok(Arguments::new(class, arguments))
}

struct Argument {
    name: &'static str,
    key: BindingKey,
    value: Option<Value>,
}

/// Resolved arguments of a constructor or method, in declaration order.
pub struct Arguments {
    class: TypeInfo,
    values: Vec<Argument>,
    cursor: usize,
}

impl Arguments {
    fn new(class: TypeInfo, values: Vec<Argument>) -> Self {
        Self { class, values, cursor: 0 }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// # Errors
    /// Fails if nothing was resolved at `index` or the value isn't a `U`.
    pub fn get<U: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<U>, ResolveErrorKind> {
        self.get_optional(index)?.ok_or_else(|| self.missing(index))
    }

    /// # Errors
    /// Fails if `index` isn't declared or the value isn't a `U`.
    pub fn get_optional<U: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<U>>, ResolveErrorKind> {
        let argument = self.values.get(index).ok_or_else(|| self.missing(index))?;
        let Some(value) = argument.value.clone() else {
            return Ok(None);
        };
        downcast::<U>(value)
            .map(Some)
            .map_err(|actual| ResolveErrorKind::IncorrectType {
                key: argument.key.clone(),
                expected: type_name::<U>(),
                actual,
            })
    }

    /// Takes the argument after the last taken one.
    ///
    /// # Errors
    /// See [`Self::get`].
    pub fn take<U: Send + Sync + 'static>(&mut self) -> Result<Arc<U>, ResolveErrorKind> {
        let index = self.advance();
        self.get(index)
    }

    /// # Errors
    /// See [`Self::get_optional`].
    pub fn take_optional<U: Send + Sync + 'static>(&mut self) -> Result<Option<Arc<U>>, ResolveErrorKind> {
        let index = self.advance();
        self.get_optional(index)
    }

    /// Names of the declared parameters.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|argument| argument.name)
    }

    fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    fn missing(&self, index: usize) -> ResolveErrorKind {
        ResolveErrorKind::MissingArgument {
            class: self.class.short_name(),
            index,
        }
    }
}

impl Debug for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("class", &self.class.short_name())
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Property slot filled after construction.
pub struct Injected<U> {
    cell: OnceCell<Arc<U>>,
}

impl<U> Injected<U> {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    /// `None` until injected, and for optional properties nothing was bound for.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&Arc<U>> {
        self.cell.get()
    }

    #[inline]
    #[must_use]
    pub fn is_injected(&self) -> bool {
        self.cell.get().is_some()
    }

    #[inline]
    pub(crate) fn set(&self, value: Arc<U>) {
        // First injection wins; instances are never re-injected.
        let _ = self.cell.set(value);
    }
}

impl<U> Default for Injected<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Debug for Injected<U> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injected").field("injected", &self.is_injected()).finish()
    }
}

/// Resolves declared method parameters of injectable classes.
pub struct Injector;

impl Injector {
    /// # Errors
    /// Fails if `method` isn't declared on `T` or a parameter can't be resolved.
    pub fn method_arguments_sync<T: Injectable>(module: &Module, method: &str) -> Result<Arguments, ResolveErrorKind> {
        let injection = T::injection();
        let (method, params) = injection.method_params(method)?;
        let resolver = Resolver::new(module.clone(), module.clone(), ProvideContext::new());
        resolve_params_sync(injection.class, params, &resolver, |index, name| InjectionTarget::MethodArg {
            method,
            index,
            name,
        })
    }

    /// # Errors
    /// Fails if `method` isn't declared on `T` or a parameter can't be resolved.
    pub async fn method_arguments_async<T: Injectable>(module: &Module, method: &str) -> Result<Arguments, ResolveErrorKind> {
        let injection = T::injection();
        let (method, params) = injection.method_params(method)?;
        let resolver = Resolver::new(module.clone(), module.clone(), ProvideContext::new());
        resolve_params_async(injection.class, params, &resolver, |index, name| InjectionTarget::MethodArg {
            method,
            index,
            name,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::{Injectable, Injected, Injection, Injector, Param};
    use crate::{
        errors::{InjectionTarget, ResolveErrorKind, SetupErrorKind},
        key::BindingKey,
        Container, Module, ModuleSetup,
    };

    use std::sync::Arc;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Handlers;

    #[async_trait::async_trait]
    impl ModuleSetup for Handlers {
        async fn setup(&self, module: &Module) -> Result<(), SetupErrorKind> {
            module.bind().constant("greeting", String::from("hello"))?;
            module.bind().functional("user", |_| async { Ok(String::from("ann")) })?;
            Ok(())
        }
    }

    struct Greeter {
        greeting: Arc<String>,
        suffix: Option<Arc<String>>,
        audit: Injected<u8>,
    }

    impl Greeter {
        fn greet(&self, user: &str) -> String {
            let suffix = self.suffix.as_deref().map_or("", String::as_str);
            format!("{} {user}{suffix}", self.greeting)
        }
    }

    impl Injectable for Greeter {
        fn injection() -> Injection<Self> {
            Injection::new(|mut args| {
                Ok(Greeter {
                    greeting: args.take()?,
                    suffix: args.take_optional()?,
                    audit: Injected::new(),
                })
            })
            .arg("greeting", "greeting")
            .optional_arg("suffix", "suffix")
            .optional_property("audit", "audit", |greeter: &Greeter| &greeter.audit)
            .method("greet", [Param::new("user", "user")])
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_optional_points_and_method_arguments() {
        let container = Container::new();
        let module = container.register::<Handlers>().await.unwrap();
        module.bind().sync_singleton_class::<Greeter>().unwrap();

        let greeter = module.provide_sync::<Greeter>(BindingKey::of::<Greeter>()).unwrap();
        assert!(greeter.suffix.is_none());
        assert!(!greeter.audit.is_injected());

        let args = Injector::method_arguments_async::<Greeter>(&module, "greet").await.unwrap();
        assert_eq!(args.names().collect::<Vec<_>>(), ["user"]);
        let user = args.get::<String>(0).unwrap();
        assert_eq!(greeter.greet(&user), "hello ann");

        assert!(matches!(
            Injector::method_arguments_sync::<Greeter>(&module, "greet"),
            Err(ResolveErrorKind::Injection(_))
        ));
        assert!(matches!(
            Injector::method_arguments_sync::<Greeter>(&module, "unknown"),
            Err(ResolveErrorKind::UnknownMethod { .. })
        ));
    }

    #[derive(Debug)]
    struct Broken;

    impl Injectable for Broken {
        fn injection() -> Injection<Self> {
            Injection::new(|_| Ok(Broken)).arg("missing", "missing")
        }
    }

    #[derive(Debug)]
    struct Outer(#[allow(dead_code)] Arc<Broken>);

    impl Injectable for Outer {
        fn injection() -> Injection<Self> {
            Injection::new(|mut args| Ok(Outer(args.take()?))).arg("broken", BindingKey::of::<Broken>())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_wrapped_once_with_context() {
        let container = Container::new();
        let module = container.register::<Handlers>().await.unwrap();
        module.bind().sync_singleton_class::<Broken>().unwrap();
        module.bind().sync_singleton_class::<Outer>().unwrap();

        let err = module.provide_sync::<Outer>(BindingKey::of::<Outer>()).unwrap_err();
        let injection = err.injection().unwrap();

        assert_eq!(injection.class, "Broken");
        assert_eq!(injection.key, BindingKey::name("missing"));
        assert_eq!(
            injection.target,
            InjectionTarget::ConstructorArg {
                index: 0,
                name: "missing"
            }
        );
        assert_eq!(injection.message(), "Failed to inject \"missing\"");
        assert!(injection.chain.contains("provides Outer"));
        assert!(injection.chain.contains("provides Broken"));
        assert!(injection.source.as_deref().is_some_and(ResolveErrorKind::is_not_found));
    }

    struct Typed {
        count: Injected<u8>,
    }

    impl std::fmt::Debug for Typed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Typed").finish_non_exhaustive()
        }
    }

    impl Injectable for Typed {
        fn injection() -> Injection<Self> {
            Injection::new(|_| Ok(Typed { count: Injected::new() })).property("count", "greeting", |typed: &Typed| &typed.count)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_property_type_mismatch() {
        let container = Container::new();
        let module = container.register::<Handlers>().await.unwrap();
        module.bind().sync_singleton_class::<Typed>().unwrap();

        let err = module.provide_sync::<Typed>(BindingKey::of::<Typed>()).unwrap_err();
        let injection = err.injection().unwrap();
        assert_eq!(injection.target, InjectionTarget::Property { name: "count" });
        assert!(matches!(
            injection.source.as_deref(),
            Some(ResolveErrorKind::IncorrectType { .. })
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_arguments_keep_declaration_order() {
        struct Pair(Arc<String>, Arc<String>);

        impl Injectable for Pair {
            fn injection() -> Injection<Self> {
                Injection::new(|args| Ok(Pair(args.get(0)?, args.get(1)?)))
                    .arg("slow", "slow")
                    .arg("fast", "fast")
            }
        }

        let container = Container::new();
        let module = container.register::<Handlers>().await.unwrap();
        module
            .bind()
            .functional("slow", |_| async {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(String::from("slow"))
            })
            .unwrap();
        module.bind().functional("fast", |_| async { Ok(String::from("fast")) }).unwrap();
        module.bind().singleton_class::<Pair>().unwrap();

        let pair = module.provide_async::<Pair>(BindingKey::of::<Pair>()).await.unwrap();
        assert_eq!((pair.0.as_str(), pair.1.as_str()), ("slow", "fast"));
    }
}
