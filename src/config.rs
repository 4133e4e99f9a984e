/// Config for a functional binding
/// ## Fields
/// - `singleton`:
///   If `true`, the value produced by the function is cached and reused.
///   If `false`, the function runs on every resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub singleton: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { singleton: true }
    }
}

impl Config {
    #[inline]
    #[must_use]
    pub const fn transient() -> Self {
        Self { singleton: false }
    }
}

/// Options of a single `provide*` call.
/// ## Fields
/// - `optional`:
///   If `true`, a missing binding resolves to `None` instead of an error.
///   Any other failure is still reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProvideOptions {
    pub optional: bool,
}

impl ProvideOptions {
    #[inline]
    #[must_use]
    pub const fn optional() -> Self {
        Self { optional: true }
    }
}
