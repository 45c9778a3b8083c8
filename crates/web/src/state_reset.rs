//! Wipe application state between tests

use std::sync::Arc;
use tracing::{debug, info};

use testbridge_common::{
    BulkCleanable, Clearable, HookPoint, LifecycleHooks, ResetHookOrder, Result,
};

/// Well-known reset paths; the second is kept for older clients
pub const RESET_PATHS: &[&str] = &["/__cypress__/reset_state", "/cypress_rails_reset_state"];

/// Body of a successful reset response
pub const RESET_COMPLETED: &str = "State reset completed";

/// Clears persistent storage, caches and reload state
#[derive(Clone, Default)]
pub struct StateReset {
    cleaner: Option<Arc<dyn BulkCleanable>>,
    store: Option<Arc<dyn BulkCleanable>>,
    caches: Vec<Arc<dyn Clearable>>,
    reloaders: Vec<Arc<dyn Clearable>>,
    hooks: LifecycleHooks,
    hook_order: ResetHookOrder,
}

impl StateReset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dedicated cleaning utility; preferred over the store when present
    pub fn with_cleaner(mut self, cleaner: Arc<dyn BulkCleanable>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Store whose rows are deleted directly when no cleaner is set
    pub fn with_store(mut self, store: Arc<dyn BulkCleanable>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Clearable>) -> Self {
        self.caches.push(cache);
        self
    }

    pub fn with_reloader(mut self, reloader: Arc<dyn Clearable>) -> Self {
        self.reloaders.push(reloader);
        self
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_hook_order(mut self, order: ResetHookOrder) -> Self {
        self.hook_order = order;
        self
    }

    pub fn hook_order(&self) -> ResetHookOrder {
        self.hook_order
    }

    pub fn is_reset_path(path: &str) -> bool {
        RESET_PATHS.contains(&path)
    }

    /// Run the reset; safe to call on an already empty application
    pub fn reset(&self) -> Result<()> {
        if self.hook_order == ResetHookOrder::BeforeCleanup {
            self.hooks.run(HookPoint::AfterStateReset)?;
        }

        match self.cleaner.as_ref().or(self.store.as_ref()) {
            Some(store) => store.clear_all()?,
            None => debug!("No store registered; skipping data cleanup"),
        }

        for cache in &self.caches {
            cache.clear();
        }
        for reloader in &self.reloaders {
            reloader.clear();
        }

        if self.hook_order == ResetHookOrder::AfterCleanup {
            self.hooks.run(HookPoint::AfterStateReset)?;
        }

        info!("State reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use testbridge_common::Database;

    struct RecordingCleaner(Arc<Mutex<Vec<&'static str>>>);

    impl BulkCleanable for RecordingCleaner {
        fn clear_all(&self) -> Result<()> {
            self.0.lock().push("clean");
            Ok(())
        }
    }

    fn seeded_db() -> Database {
        let db = Database::open_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE schema_migrations (version TEXT);
             INSERT INTO users (name) VALUES ('ada');
             INSERT INTO schema_migrations VALUES ('20240101');",
        )
        .unwrap();
        db
    }

    fn ordered(order: ResetHookOrder) -> Vec<&'static str> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook_log = log.clone();
        let hooks = LifecycleHooks::new().on(HookPoint::AfterStateReset, move || {
            hook_log.lock().push("hook");
            Ok(())
        });

        StateReset::new()
            .with_cleaner(Arc::new(RecordingCleaner(log.clone())))
            .with_hooks(hooks)
            .with_hook_order(order)
            .reset()
            .unwrap();

        let events = log.lock().clone();
        events
    }

    #[test]
    fn test_reset_clears_store_and_caches() {
        let db = seeded_db();
        let cache: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        cache.insert("user:1".into(), "ada".into());

        let reset = StateReset::new()
            .with_store(Arc::new(db.clone()))
            .with_cache(cache.clone());
        reset.reset().unwrap();

        assert_eq!(db.count_rows("users").unwrap(), 0);
        assert_eq!(db.count_rows("schema_migrations").unwrap(), 1);
        assert!(cache.is_empty());

        // Idempotent on an empty store
        reset.reset().unwrap();
    }

    #[test]
    fn test_cleaner_preferred_over_store() {
        let db = seeded_db();
        let log = Arc::new(Mutex::new(Vec::new()));

        StateReset::new()
            .with_store(Arc::new(db.clone()))
            .with_cleaner(Arc::new(RecordingCleaner(log.clone())))
            .reset()
            .unwrap();

        assert_eq!(*log.lock(), vec!["clean"]);
        assert_eq!(db.count_rows("users").unwrap(), 1);
    }

    #[test]
    fn test_hook_order() {
        assert_eq!(ordered(ResetHookOrder::AfterCleanup), vec!["clean", "hook"]);
        assert_eq!(ordered(ResetHookOrder::BeforeCleanup), vec!["hook", "clean"]);
    }

    #[test]
    fn test_without_store_is_noop() {
        StateReset::new().reset().unwrap();
        assert!(StateReset::is_reset_path("/cypress_rails_reset_state"));
        assert!(!StateReset::is_reset_path("/reset"));
    }
}
