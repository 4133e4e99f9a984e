use super::ResolveErrorKind;

/// Failure reported by user code: a functional factory, a constructor or a hook.
#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}

impl From<ResolveErrorKind> for InstantiateErrorKind {
    fn from(value: ResolveErrorKind) -> Self {
        Self::Custom(anyhow::Error::new(value))
    }
}
