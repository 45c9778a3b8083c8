//! What a command can reach inside the running application

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use testbridge_common::Database;

use crate::helper::HelperContext;
use crate::vcr::Recorder;

/// Live application handles passed to every command invocation
#[derive(Clone, Default)]
pub struct CommandContext {
    state: Option<Arc<dyn Any + Send + Sync>>,
    database: Option<Database>,
    recorder: Option<Arc<Recorder>>,
    helper: Arc<HelperContext>,
    install_folder: PathBuf,
}

impl CommandContext {
    pub fn new(install_folder: impl Into<PathBuf>) -> Self {
        Self {
            install_folder: install_folder.into(),
            ..Default::default()
        }
    }

    /// Share application state; commands get it back with [`state`](Self::state)
    pub fn with_state<T: Any + Send + Sync>(mut self, state: Arc<T>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub(crate) fn with_helper(mut self, helper: Arc<HelperContext>) -> Self {
        self.helper = helper;
        self
    }

    /// Application state, if it was registered as a `T`
    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.recorder.as_ref()
    }

    pub fn helper(&self) -> &HelperContext {
        &self.helper
    }

    pub fn install_folder(&self) -> &Path {
        &self.install_folder
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("state", &self.state.is_some())
            .field("database", &self.database.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("helper", &self.helper.source())
            .field("install_folder", &self.install_folder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Shop {
        orders: Mutex<Vec<String>>,
    }

    #[test]
    fn test_state_downcast() {
        let shop = Arc::new(Shop {
            orders: Mutex::new(Vec::new()),
        });
        let ctx = CommandContext::new("e2e").with_state(shop.clone());

        ctx.state::<Shop>().unwrap().orders.lock().push("order-1".into());
        assert_eq!(shop.orders.lock().len(), 1);

        assert!(ctx.state::<String>().is_none());
        assert!(CommandContext::new("e2e").state::<Shop>().is_none());
    }
}
