//! Lifecycle hooks supplied by the embedding application
//!
//! Hooks are typed optional callables. An absent hook is a no-op; a present
//! hook runs synchronously and its error becomes a fatal error of the phase
//! it was invoked from.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{Error, Result};

/// A zero-argument callback
pub type Hook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Points in the run at which a hook may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeServerStart,
    AfterServerStart,
    AfterTransactionStart,
    AfterStateReset,
    BeforeServerStop,
}

impl HookPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::BeforeServerStart => "before_server_start",
            HookPoint::AfterServerStart => "after_server_start",
            HookPoint::AfterTransactionStart => "after_transaction_start",
            HookPoint::AfterStateReset => "after_state_reset",
            HookPoint::BeforeServerStop => "before_server_stop",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named optional callbacks for one orchestrator / bridge instance
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub before_server_start: Option<Hook>,
    pub after_server_start: Option<Hook>,
    pub after_transaction_start: Option<Hook>,
    pub after_state_reset: Option<Hook>,
    pub before_server_stop: Option<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook for `point`, replacing any previous one
    pub fn on<F>(mut self, point: HookPoint, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.slot_mut(point) = Some(Arc::new(hook));
        self
    }

    pub fn get(&self, point: HookPoint) -> Option<&Hook> {
        match point {
            HookPoint::BeforeServerStart => self.before_server_start.as_ref(),
            HookPoint::AfterServerStart => self.after_server_start.as_ref(),
            HookPoint::AfterTransactionStart => self.after_transaction_start.as_ref(),
            HookPoint::AfterStateReset => self.after_state_reset.as_ref(),
            HookPoint::BeforeServerStop => self.before_server_stop.as_ref(),
        }
    }

    fn slot_mut(&mut self, point: HookPoint) -> &mut Option<Hook> {
        match point {
            HookPoint::BeforeServerStart => &mut self.before_server_start,
            HookPoint::AfterServerStart => &mut self.after_server_start,
            HookPoint::AfterTransactionStart => &mut self.after_transaction_start,
            HookPoint::AfterStateReset => &mut self.after_state_reset,
            HookPoint::BeforeServerStop => &mut self.before_server_stop,
        }
    }

    /// Invoke the hook for `point` if one is set
    pub fn run(&self, point: HookPoint) -> Result<()> {
        let Some(hook) = self.get(point) else {
            return Ok(());
        };

        debug!("Running {} hook", point);
        hook().map_err(|e| Error::Hook {
            hook: point.to_string(),
            message: format!("{:#}", e),
        })
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("before_server_start", &self.before_server_start.is_some())
            .field("after_server_start", &self.after_server_start.is_some())
            .field("after_transaction_start", &self.after_transaction_start.is_some())
            .field("after_state_reset", &self.after_state_reset.is_some())
            .field("before_server_stop", &self.before_server_stop.is_some())
            .finish()
    }
}
