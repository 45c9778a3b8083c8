//! TestBridge server lifecycle
//!
//! This crate runs the application server around a browser test run:
//! - Spawns the server as a child process in its own process group
//! - Polls a readiness path until the server answers
//! - Optionally wraps the run in a rollback-only transaction
//! - Tears everything down deterministically, even when the run fails
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ServerOrchestrator::run(block)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  before_server_start hook                                   │
//! │  set test-mode markers                                      │
//! │  ProcessSupervisor::spawn(argv, env) -> ChildHandle         │
//! │  ReadinessProbe::wait_until_ready(url, timeout)             │
//! │  after_server_start hook                                    │
//! │  TransactionScope::begin()   (transactional only)           │
//! │  after_transaction_start hook                               │
//! │  block(RunContext)           e.g. `cypress run`             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  teardown (always, once a child exists)                     │
//! │    before_server_stop hook                                  │
//! │    TransactionScope::rollback()                             │
//! │    ProcessSupervisor::terminate(SIGTERM -> wait -> SIGKILL) │
//! │    clear test-mode markers                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod runner;
pub mod supervisor;
pub mod transaction;

pub use error::{E2eError, E2eResult};
pub use orchestrator::{LifecycleState, RunContext, ServerConfig, ServerOrchestrator};
pub use probe::ReadinessProbe;
pub use runner::{Launcher, RunnerMode, TestRunner};
pub use supervisor::{ChildHandle, ProcessSupervisor};
pub use transaction::TransactionScope;
