use std::fmt::{self, Display, Formatter};

use crate::key::BindingKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStyle {
    Sync,
    Async,
}

impl Display for BindingStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Async => "async",
        })
    }
}

/// Configuration errors, raised while modules declare their bindings.
#[derive(thiserror::Error, Debug)]
pub enum BindingErrorKind {
    #[error("Binding key can't be empty")]
    EmptyKey,
    #[error("Binding ref resolved to another binding ref. Refs are resolved one level deep")]
    NestedRef,
    #[error(
        "Key {key} is already bound as {bound_as} in module {module}. \
        Unbind it before binding it as {requested}"
    )]
    ConflictingStyle {
        module: String,
        key: BindingKey,
        bound_as: BindingStyle,
        requested: BindingStyle,
    },
    #[error("Can't export {key} from module {module}: it's neither bound locally nor reachable via an import")]
    ExportUnbound { module: String, key: BindingKey },
    #[error("Can't alias {key} as {alias} in module {module}: {key} is neither bound locally nor reachable via an import")]
    AliasUnbound {
        module: String,
        key: BindingKey,
        alias: BindingKey,
    },
    #[error("Aliasing {key} as {alias} in module {module} would make the alias point at itself")]
    AliasLoop {
        module: String,
        key: BindingKey,
        alias: BindingKey,
    },
    #[error("Module {module} can't export {key} globally before exporting it locally")]
    GlobalExportWithoutLocal { module: String, key: BindingKey },
    #[error("Fiber module {module} can't {operation}. Fibers aren't part of the global module graph")]
    FiberOperation { module: String, operation: &'static str },
    #[error("Module {module} is a fiber module and can't be registered or imported")]
    FiberImport { module: &'static str },
    #[error("Module {module} isn't attached to a container")]
    Detached { module: String },
    #[error("Container {container} was dropped while waiting for global binding {key}")]
    WaitAborted { container: String, key: BindingKey },
    #[error("Importing container {child} into {parent} would create an import cycle")]
    ImportCycle { parent: String, child: String },
    #[error("Container import chain exceeds {limit} levels")]
    ImportDepthExceeded { limit: usize },
}
