//! TestBridge Common Library
//!
//! Shared configuration, lifecycle hooks, error types and storage
//! capabilities used by both the server orchestrator and the command bridge.

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod store;

// Re-export commonly used types
pub use config::{Configuration, Framework, ResetHookOrder};
pub use db::Database;
pub use error::{Error, Result};
pub use hooks::{Hook, HookPoint, LifecycleHooks};
pub use store::{BulkCleanable, Clearable, TransactionalStore};

/// TestBridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment flag telling the application server it runs under an e2e harness.
pub const TEST_MODE_FLAG_VAR: &str = "CYPRESS";

/// Environment variable selecting the application's runtime configuration.
pub const ENVIRONMENT_VAR: &str = "APP_ENV";

/// Value written to [`ENVIRONMENT_VAR`] while a run is active.
pub const TEST_ENVIRONMENT: &str = "test";
