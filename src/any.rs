use std::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Type-erased value produced by factories.
pub type Value = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// Last path segment of the type name, generics included.
    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split_once('<').map_or(self.name, |(base, _)| base);
        match base.rsplit_once("::") {
            Some((prefix, _)) => &self.name[prefix.len() + 2..],
            None => self.name,
        }
    }
}

/// Downcasts an erased value, reporting the stored type on failure.
pub(crate) fn downcast<T: Send + Sync + 'static>(value: Value) -> Result<Arc<T>, TypeId> {
    value.downcast::<T>().map_err(|value| (*value).type_id())
}

#[cfg(test)]
mod tests {
    use super::{downcast, TypeInfo, Value};

    use std::sync::Arc;

    struct Local;

    #[test]
    fn test_short_name() {
        assert_eq!(TypeInfo::of::<Local>().short_name(), "Local");
        assert_eq!(TypeInfo::of::<Option<Local>>().short_name(), "Option<modwire::any::tests::Local>");
        assert_eq!(TypeInfo::of::<u8>().short_name(), "u8");
    }

    #[test]
    fn test_downcast() {
        let value: Value = Arc::new(5_u32);

        assert!(downcast::<u64>(value.clone()).is_err());
        assert_eq!(*downcast::<u32>(value).unwrap(), 5);
    }
}
