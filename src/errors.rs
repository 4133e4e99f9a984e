mod binding;
mod injection;
mod instantiate;
mod resolve;
mod setup;

pub use binding::{BindingErrorKind, BindingStyle};
pub use injection::{InjectionError, InjectionTarget};
pub use instantiate::InstantiateErrorKind;
pub use resolve::ResolveErrorKind;
pub use setup::SetupErrorKind;
