use std::fmt::{self, Display, Formatter};

use super::ResolveErrorKind;
use crate::key::BindingKey;

/// Injection point an error was raised for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionTarget {
    Constructor,
    ConstructorArg { index: usize, name: &'static str },
    MethodArg {
        method: &'static str,
        index: usize,
        name: &'static str,
    },
    Property { name: &'static str },
}

impl Display for InjectionTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructor => f.write_str("constructor"),
            Self::ConstructorArg { index, name } => write!(f, "constructor argument #{index} `{name}`"),
            Self::MethodArg { method, index, name } => write!(f, "argument #{index} `{name}` of method `{method}`"),
            Self::Property { name } => write!(f, "property `{name}`"),
        }
    }
}

/// Failure of a single injection point, with the provide chain that led to it.
#[derive(thiserror::Error, Debug)]
#[error("{message} [class: {class}, {target}, key: {key}]\nprovide chain:\n{chain}")]
pub struct InjectionError {
    message: String,
    pub class: &'static str,
    pub target: InjectionTarget,
    pub key: BindingKey,
    pub chain: String,
    #[source]
    pub source: Option<Box<ResolveErrorKind>>,
}

impl InjectionError {
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        class: &'static str,
        target: InjectionTarget,
        key: BindingKey,
        chain: String,
        source: Option<ResolveErrorKind>,
    ) -> Self {
        Self {
            message: message.into(),
            class,
            target,
            key,
            chain,
            source: source.map(Box::new),
        }
    }

    /// Message without class, key or chain context appended.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
