use std::{any::TypeId, sync::Arc};

use super::{BindingErrorKind, InjectionError, InstantiateErrorKind};
use crate::key::BindingKey;

#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    #[error("Binding {key} not found in module {module}")]
    NotFound { module: String, key: BindingKey },
    #[error("Binding {key} not found in global exports")]
    NotFoundGlobal { key: BindingKey },
    #[error("Binding {key} of module {module} is async and can't be resolved as sync")]
    AsyncResolvedAsSync { module: String, key: BindingKey },
    #[error("Incorrect type provided for {key}. Actual: {actual:?}, expected: {expected}")]
    IncorrectType {
        key: BindingKey,
        expected: &'static str,
        actual: TypeId,
    },
    #[error("Argument #{index} of {class} is missing")]
    MissingArgument { class: &'static str, index: usize },
    #[error("Method `{method}` of {class} has no declared parameters")]
    UnknownMethod { class: &'static str, method: String },
    #[error("Provide chain exceeds {limit} hops:\n{chain}")]
    ChainTooLong { limit: usize, chain: String },
    #[error(transparent)]
    CircularDependency(Box<InjectionError>),
    #[error(transparent)]
    Injection(Box<InjectionError>),
    #[error(transparent)]
    Binding(#[from] BindingErrorKind),
    #[error(transparent)]
    Instantiate(#[from] InstantiateErrorKind),
    /// Observed by a caller that joined another caller's in-flight construction.
    #[error(transparent)]
    Shared(Arc<ResolveErrorKind>),
}

impl ResolveErrorKind {
    /// `true` for a plain lookup miss, the only error optional provides and
    /// async-to-sync lookup fallback swallow.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::NotFoundGlobal { .. } => true,
            Self::Shared(err) => err.is_not_found(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_circular(&self) -> bool {
        match self {
            Self::CircularDependency(_) => true,
            Self::Shared(err) => err.is_circular(),
            _ => false,
        }
    }

    /// Injection errors (circular ones included) already carry class and chain context.
    #[must_use]
    pub fn is_injection(&self) -> bool {
        match self {
            Self::Injection(_) | Self::CircularDependency(_) => true,
            Self::Shared(err) => err.is_injection(),
            _ => false,
        }
    }

    #[must_use]
    pub fn injection(&self) -> Option<&InjectionError> {
        match self {
            Self::Injection(err) | Self::CircularDependency(err) => Some(err),
            Self::Shared(err) => err.injection(),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_shared(err: Arc<ResolveErrorKind>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Self::Shared)
    }
}
