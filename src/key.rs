use once_cell::sync::OnceCell;
use std::{
    borrow::Cow,
    fmt::{self, Debug, Display, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{any::TypeInfo, errors::BindingErrorKind};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique key with a description, equal only to itself and its clones.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    id: u64,
    description: Cow<'static, str>,
}

impl Symbol {
    #[must_use]
    pub fn new(description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

/// Identifier a binding is registered under.
///
/// Equality is identity: names compare by value, symbols by their allocation,
/// types by [`core::any::TypeId`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindingKey {
    Name(Cow<'static, str>),
    Symbol(Symbol),
    Type(TypeInfo),
}

impl BindingKey {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeInfo::of::<T>())
    }

    #[inline]
    #[must_use]
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(name.into())
    }

    /// Empty names are the only keys a module refuses outright.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Name(name) if name.is_empty())
    }
}

impl Display for BindingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "\"{name}\""),
            Self::Symbol(symbol) => write!(f, "Symbol({})", symbol.description),
            Self::Type(type_info) => write!(f, "{}", type_info.short_name()),
        }
    }
}

impl Debug for BindingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<&'static str> for BindingKey {
    fn from(value: &'static str) -> Self {
        Self::Name(Cow::Borrowed(value))
    }
}

impl From<String> for BindingKey {
    fn from(value: String) -> Self {
        Self::Name(Cow::Owned(value))
    }
}

impl From<Symbol> for BindingKey {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl From<&Symbol> for BindingKey {
    fn from(value: &Symbol) -> Self {
        Self::Symbol(value.clone())
    }
}

impl From<TypeInfo> for BindingKey {
    fn from(value: TypeInfo) -> Self {
        Self::Type(value)
    }
}

impl From<&BindingKey> for BindingKey {
    fn from(value: &BindingKey) -> Self {
        value.clone()
    }
}

/// Deferred key: a closure evaluated on first use, then memoized.
///
/// Lets a declaration point at a key that doesn't exist yet.
#[derive(Clone)]
pub struct BindingRef {
    resolve: Arc<dyn Fn() -> KeyTerm + Send + Sync>,
    resolved: Arc<OnceCell<BindingKey>>,
}

impl BindingRef {
    #[must_use]
    pub fn new<F, K>(f: F) -> Self
    where
        F: Fn() -> K + Send + Sync + 'static,
        K: Into<KeyTerm>,
    {
        Self {
            resolve: Arc::new(move || f().into()),
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// Resolves the ref exactly one level deep.
    ///
    /// # Errors
    /// Returns [`BindingErrorKind::NestedRef`] if the closure yields another ref.
    pub fn resolve(&self) -> Result<BindingKey, BindingErrorKind> {
        self.resolved
            .get_or_try_init(|| match (self.resolve)() {
                KeyTerm::Key(key) => Ok(key),
                KeyTerm::Ref(_) => Err(BindingErrorKind::NestedRef),
            })
            .cloned()
    }
}

impl Debug for BindingRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.resolved.get() {
            Some(key) => write!(f, "BindingRef({key})"),
            None => f.write_str("BindingRef(<unresolved>)"),
        }
    }
}

/// Wraps a closure into a [`BindingRef`].
#[inline]
#[must_use]
pub fn binding_ref<F, K>(f: F) -> BindingRef
where
    F: Fn() -> K + Send + Sync + 'static,
    K: Into<KeyTerm>,
{
    BindingRef::new(f)
}

/// Anything accepted where a key is expected: a concrete key or a ref to one.
#[derive(Clone, Debug)]
pub enum KeyTerm {
    Key(BindingKey),
    Ref(BindingRef),
}

impl KeyTerm {
    /// # Errors
    /// Propagates [`BindingRef::resolve`] errors.
    #[inline]
    pub fn resolve(&self) -> Result<BindingKey, BindingErrorKind> {
        match self {
            Self::Key(key) => Ok(key.clone()),
            Self::Ref(binding_ref) => binding_ref.resolve(),
        }
    }
}

macro_rules! impl_key_term_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for KeyTerm {
                fn from(value: $ty) -> Self {
                    Self::Key(value.into())
                }
            }
        )*
    };
}

impl_key_term_from!(&'static str, String, Symbol, &Symbol, TypeInfo, &BindingKey);

impl From<BindingKey> for KeyTerm {
    fn from(value: BindingKey) -> Self {
        Self::Key(value)
    }
}

impl From<BindingRef> for KeyTerm {
    fn from(value: BindingRef) -> Self {
        Self::Ref(value)
    }
}

/// Normalizes a key term into a concrete key.
///
/// # Errors
/// Returns [`BindingErrorKind::NestedRef`] for a ref yielding another ref.
#[inline]
pub fn resolve_binding_key(key: impl Into<KeyTerm>) -> Result<BindingKey, BindingErrorKind> {
    key.into().resolve()
}

#[cfg(test)]
mod tests {
    use super::{binding_ref, resolve_binding_key, BindingKey, BindingRef, KeyTerm, Symbol};
    use crate::errors::BindingErrorKind;

    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };

    struct Later;

    #[test]
    fn test_key_identity() {
        let a = Symbol::new("token");
        let b = Symbol::new("token");

        assert_ne!(BindingKey::from(&a), BindingKey::from(&b));
        assert_eq!(BindingKey::from(&a), BindingKey::from(a.clone()));
        assert_eq!(BindingKey::from("db"), BindingKey::from(String::from("db")));
        assert_eq!(BindingKey::of::<Later>(), BindingKey::of::<Later>());
        assert_ne!(BindingKey::of::<Later>(), BindingKey::of::<u8>());
    }

    #[test]
    fn test_ref_resolves_once() {
        let calls = Arc::new(AtomicU8::new(0));
        let key_ref = binding_ref({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                BindingKey::of::<Later>()
            }
        });

        assert_eq!(resolve_binding_key(key_ref.clone()).unwrap(), BindingKey::of::<Later>());
        assert_eq!(key_ref.resolve().unwrap(), BindingKey::of::<Later>());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_ref_rejected() {
        let key_ref = BindingRef::new(|| KeyTerm::Ref(BindingRef::new(|| "inner")));

        assert!(matches!(key_ref.resolve(), Err(BindingErrorKind::NestedRef)));
    }

    #[test]
    fn test_plain_key_passes_through() {
        assert_eq!(resolve_binding_key("plain").unwrap(), BindingKey::name("plain"));
        assert!(BindingKey::name("").is_empty());
    }
}
