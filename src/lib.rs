pub(crate) mod any;
pub(crate) mod config;
pub(crate) mod container;
pub(crate) mod context;
pub(crate) mod errors;
pub(crate) mod injection;
pub(crate) mod key;
pub(crate) mod module;
pub(crate) mod resolver;

pub mod factory;

pub use any::{TypeInfo, Value};
pub use config::{Config, ProvideOptions};
pub use container::{Container, MAX_IMPORT_DEPTH};
pub use context::{Hop, ProvideContext, MAX_CHAIN_LEN};
pub use errors::{
    BindingErrorKind, BindingStyle, InjectionError, InjectionTarget, InstantiateErrorKind, ResolveErrorKind, SetupErrorKind,
};
pub use injection::{Arguments, Injectable, Injected, Injection, Injector, Param};
pub use key::{binding_ref, resolve_binding_key, BindingKey, BindingRef, KeyTerm, Symbol};
pub use module::{Binder, Importer, Module, ModuleId, ModuleKind, ModuleSetup, ModuleTerm, ParentModule};
pub use resolver::Resolver;

pub use async_trait::async_trait;
