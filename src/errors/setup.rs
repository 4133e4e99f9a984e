use std::sync::Arc;

use super::{BindingErrorKind, ResolveErrorKind};

/// Everything a module `setup` (and therefore registration or import) may raise.
#[derive(thiserror::Error, Debug)]
pub enum SetupErrorKind {
    #[error(transparent)]
    Binding(#[from] BindingErrorKind),
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
    /// Observed by a caller that waited for another caller's init of the same module.
    #[error(transparent)]
    Shared(Arc<SetupErrorKind>),
}

impl SetupErrorKind {
    #[inline]
    #[must_use]
    pub(crate) fn from_shared(err: Arc<SetupErrorKind>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Self::Shared)
    }
}
