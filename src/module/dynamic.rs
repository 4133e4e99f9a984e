use std::sync::{Arc, Weak};

use super::{Module, ModuleInner};
use crate::container::{Container, ContainerInner};

/// Whoever imported a dynamic module: a module, or the container for root-scope imports.
#[derive(Clone, Debug)]
pub enum Importer {
    Module(Module),
    Container(Container),
}

impl Importer {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Module(module) => module.name(),
            Self::Container(container) => container.name(),
        }
    }
}

pub(crate) enum WeakImporter {
    Module(Weak<ModuleInner>),
    Container(Weak<ContainerInner>),
}

impl WeakImporter {
    fn upgrade(&self) -> Option<Importer> {
        match self {
            Self::Module(module) => module.upgrade().map(|inner| Importer::Module(Module { inner })),
            Self::Container(container) => container.upgrade().map(|inner| Importer::Container(Container { inner })),
        }
    }
}

impl Module {
    pub(crate) fn set_importer(&self, importer: WeakImporter) {
        *self.inner.importer.lock() = Some(importer);
    }

    /// The importer of a dynamic module, e.g. to qualify its keys with the importer's name.
    /// `None` for other modules, or once the importer is gone.
    #[must_use]
    pub fn importer(&self) -> Option<Importer> {
        self.inner.importer.lock().as_ref().and_then(WeakImporter::upgrade)
    }

    pub(crate) fn weak_importer(&self) -> WeakImporter {
        WeakImporter::Module(Arc::downgrade(&self.inner))
    }
}
