//! Lifecycle hook registration and dispatch.
//!
//! Hooks are plain callbacks kept in per-(model, phase) lists. Within a
//! phase they run sequentially in registration order, and the first failure
//! stops the phase.

use fireodm_core::{Document, Error, Phase, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type BeforeFn = dyn Fn(&mut Document) -> anyhow::Result<()> + Send + Sync;
type AfterFn = dyn Fn(&Document) -> anyhow::Result<()> + Send + Sync;

/// The operation a hook wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Save,
    Load,
    Delete,
}

impl Operation {
    pub const fn before(self) -> Phase {
        match self {
            Self::Save => Phase::BeforeSave,
            Self::Load => Phase::BeforeLoad,
            Self::Delete => Phase::BeforeDelete,
        }
    }

    pub const fn after(self) -> Phase {
        match self {
            Self::Save => Phase::AfterSave,
            Self::Load => Phase::AfterLoad,
            Self::Delete => Phase::AfterDelete,
        }
    }
}

#[derive(Clone)]
enum Callback {
    /// May mutate the document and veto the operation.
    Before(Arc<BeforeFn>),
    /// Sees the finalized document only.
    After(Arc<AfterFn>),
}

#[derive(Clone)]
struct Hook {
    name: String,
    callback: Callback,
}

/// Ordered hook lists keyed by model id and phase.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<(String, Phase), Vec<Hook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(String, usize)> = self
            .hooks
            .iter()
            .map(|((model, phase), hooks)| (format!("{model}.{phase}"), hooks.len()))
            .collect();
        counts.sort();
        f.debug_struct("HookRegistry")
            .field("hooks", &counts)
            .finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook that runs before `operation` on `model`.
    pub fn on_before<F>(
        &mut self,
        model: impl Into<String>,
        operation: Operation,
        name: impl Into<String>,
        callback: F,
    ) where
        F: Fn(&mut Document) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(
            model.into(),
            operation.before(),
            name.into(),
            Callback::Before(Arc::new(callback)),
        );
    }

    /// Register a hook that runs after `operation` on `model` has finished.
    pub fn on_after<F>(
        &mut self,
        model: impl Into<String>,
        operation: Operation,
        name: impl Into<String>,
        callback: F,
    ) where
        F: Fn(&Document) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(
            model.into(),
            operation.after(),
            name.into(),
            Callback::After(Arc::new(callback)),
        );
    }

    fn push(&mut self, model: String, phase: Phase, name: String, callback: Callback) {
        log::debug!("Registered {phase} hook `{name}` on {model}");
        self.hooks
            .entry((model, phase))
            .or_default()
            .push(Hook { name, callback });
    }

    /// Number of hooks registered for a model and phase.
    pub fn count(&self, model: &str, phase: Phase) -> usize {
        self.hooks
            .get(&(model.to_string(), phase))
            .map_or(0, Vec::len)
    }

    /// Model ids that have at least one hook.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        let mut models: Vec<&str> = self.hooks.keys().map(|(m, _)| m.as_str()).collect();
        models.sort_unstable();
        models.dedup();
        models.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook of `phase` on `doc` in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HookAbort`] for the first hook that fails; the hooks
    /// after it are not run.
    pub fn dispatch(&self, model: &str, phase: Phase, doc: &mut Document) -> Result<()> {
        self.run(model, phase, |hook| match &hook.callback {
            Callback::Before(f) => f(doc),
            Callback::After(f) => f(doc),
        })
    }

    /// Run the hooks of a post-commit phase against a read-only document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HookAbort`] for the first hook that fails.
    pub fn dispatch_after(&self, model: &str, phase: Phase, doc: &Document) -> Result<()> {
        self.run(model, phase, |hook| match &hook.callback {
            Callback::After(f) => f(doc),
            Callback::Before(_) => Ok(()),
        })
    }

    fn run<F>(&self, model: &str, phase: Phase, mut call: F) -> Result<()>
    where
        F: FnMut(&Hook) -> anyhow::Result<()>,
    {
        let Some(hooks) = self.hooks.get(&(model.to_string(), phase)) else {
            return Ok(());
        };

        for hook in hooks {
            log::debug!("Running {phase} hook `{}` on {model}", hook.name);
            call(hook).map_err(|err| Error::HookAbort {
                model: model.to_string(),
                phase,
                hook: hook.name.clone(),
                message: format!("{err:#}"),
            })?;
        }
        Ok(())
    }
}
