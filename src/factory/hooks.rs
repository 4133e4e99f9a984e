use std::sync::Arc;

use tracing::debug;

use crate::errors::{InstantiateErrorKind, ResolveErrorKind};

/// Lifecycle callback receiving a freshly produced instance.
pub type Hook<T> = Arc<dyn Fn(&Arc<T>) -> Result<(), InstantiateErrorKind> + Send + Sync>;

pub(crate) struct Hooks<T> {
    constructed: Vec<Hook<T>>,
    done: Vec<Hook<T>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            constructed: Vec::new(),
            done: Vec::new(),
        }
    }
}

impl<T> Hooks<T> {
    #[inline]
    pub(crate) fn on_constructed(&mut self, hook: Hook<T>) {
        self.constructed.push(hook);
    }

    #[inline]
    pub(crate) fn on_done(&mut self, hook: Hook<T>) {
        self.done.push(hook);
    }

    /// Runs `constructed` hooks in registration order.
    pub(crate) fn constructed(&self, instance: &Arc<T>) -> Result<(), ResolveErrorKind> {
        for hook in &self.constructed {
            hook(instance)?;
        }
        if !self.constructed.is_empty() {
            debug!(count = self.constructed.len(), "Constructed hooks fired");
        }
        Ok(())
    }

    /// Runs `done` hooks in registration order.
    pub(crate) fn done(&self, instance: &Arc<T>) -> Result<(), ResolveErrorKind> {
        for hook in &self.done {
            hook(instance)?;
        }
        if !self.done.is_empty() {
            debug!(count = self.done.len(), "Done hooks fired");
        }
        Ok(())
    }
}
