//! Server lifecycle orchestration
//!
//! Composes the process supervisor, readiness probe, transaction scope and
//! lifecycle hooks into one run-and-tear-down sequence around a caller block.
//!
//! ```text
//! Idle -> Starting -> AwaitingReady -> [TransactionOpen] -> Running -> TearingDown -> Stopped
//! ```
//!
//! Once a child process exists, teardown always runs: `before_server_stop`,
//! transaction rollback, process termination, marker cleanup. Errors and
//! panics from the block surface only after teardown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info, warn};

use testbridge_common::{
    Configuration, Framework, HookPoint, LifecycleHooks, TransactionalStore, ENVIRONMENT_VAR,
    TEST_ENVIRONMENT, TEST_MODE_FLAG_VAR,
};

use crate::error::{E2eError, E2eResult};
use crate::probe::ReadinessProbe;
use crate::supervisor::{find_free_port, ChildHandle, ProcessSupervisor};
use crate::transaction::TransactionScope;

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    AwaitingReady,
    TransactionOpen,
    Running,
    TearingDown,
    Stopped,
}

/// Configuration for one orchestrated server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host the server binds to and is probed on
    pub host: String,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Folder holding the e2e project
    pub install_folder: PathBuf,

    /// Browser test framework
    pub framework: Framework,

    /// Wrap the run in a rollback-only transaction
    pub transactional: bool,

    /// Path polled until the server is ready
    pub readiness_path: String,

    /// Timeout for server startup
    pub readiness_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL
    pub stop_timeout: Duration,

    /// Server command; `{host}` and `{port}` are substituted. None = auto-detect
    pub server_command: Option<Vec<String>>,

    /// Environment markers set for the duration of a run
    pub test_mode_markers: Vec<(String, String)>,
}

impl ServerConfig {
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            host: config.server_host.clone(),
            port: config.server_port,
            install_folder: config.install_folder.clone(),
            framework: Framework::default(),
            transactional: config.transactional_server,
            readiness_path: config.server_readiness_path.clone(),
            readiness_timeout: config.readiness_timeout(),
            stop_timeout: config.stop_timeout(),
            server_command: config.server_command.clone(),
            test_mode_markers: default_markers(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_configuration(&Configuration::default())
    }
}

fn default_markers() -> Vec<(String, String)> {
    vec![
        (TEST_MODE_FLAG_VAR.to_string(), "1".to_string()),
        (ENVIRONMENT_VAR.to_string(), TEST_ENVIRONMENT.to_string()),
    ]
}

/// What the running block gets to see of the server
#[derive(Debug, Clone)]
pub struct RunContext {
    pub base_url: String,
    pub host: String,
    pub port: u16,
    pub pid: u32,
}

/// Drives one server run at a time
pub struct ServerOrchestrator {
    config: ServerConfig,
    port: u16,
    hooks: LifecycleHooks,
    store: Option<Arc<dyn TransactionalStore>>,
    supervisor: ProcessSupervisor,
    probe: ReadinessProbe,
    state: LifecycleState,
    last_pid: Option<u32>,
    last_exit: Option<ExitStatus>,
}

impl ServerOrchestrator {
    /// Create an orchestrator; an unset port is resolved here, before any spawn
    pub fn new(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };

        Ok(Self {
            config,
            port,
            hooks: LifecycleHooks::default(),
            store: None,
            supervisor: ProcessSupervisor::new(),
            probe: ReadinessProbe::new()?,
            state: LifecycleState::Idle,
            last_pid: None,
            last_exit: None,
        })
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Supply the transactional data layer used when `transactional` is set
    pub fn with_store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.port)
    }

    pub fn readiness_url(&self) -> String {
        format!("{}{}", self.base_url(), self.config.readiness_path)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Pid of the most recently spawned server
    pub fn last_pid(&self) -> Option<u32> {
        self.last_pid
    }

    /// Exit status of the most recently stopped server
    pub fn last_exit_status(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    /// Command line used to launch the server
    pub fn server_argv(&self) -> Vec<String> {
        let port = self.port.to_string();
        match &self.config.server_command {
            Some(command) => command
                .iter()
                .map(|part| part.replace("{host}", &self.config.host).replace("{port}", &port))
                .collect(),
            None => {
                let mut argv = default_server_command(Path::new("."));
                argv.extend([
                    "--port".to_string(),
                    port,
                    "--bind".to_string(),
                    self.config.host.clone(),
                ]);
                argv
            }
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Start the server, run `block` against it and tear everything down
    pub async fn run<F, Fut, T>(&mut self, block: F) -> E2eResult<T>
    where
        F: FnOnce(RunContext) -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        if !matches!(self.state, LifecycleState::Idle | LifecycleState::Stopped) {
            return Err(E2eError::Config(format!(
                "a run is already in progress ({:?})",
                self.state
            )));
        }

        self.transition(LifecycleState::Starting);
        if let Err(e) = self.hooks.run(HookPoint::BeforeServerStart) {
            self.transition(LifecycleState::Stopped);
            return Err(e.into());
        }

        let markers = MarkerGuard::set(&self.config.test_mode_markers);

        let argv = self.server_argv();
        info!("Starting server: {}", argv.join(" "));
        let mut child = match self.supervisor.spawn(&argv, &self.child_env()) {
            Ok(child) => child,
            Err(e) => {
                drop(markers);
                self.transition(LifecycleState::Stopped);
                return Err(e);
            }
        };
        self.last_pid = Some(child.pid());
        self.last_exit = None;

        let mut transaction = TransactionScope::new(self.store.clone(), self.config.transactional);
        let context = RunContext {
            base_url: self.base_url(),
            host: self.config.host.clone(),
            port: self.port,
            pid: child.pid(),
        };

        let outcome = AssertUnwindSafe(self.start_and_run(&mut transaction, context, block))
            .catch_unwind()
            .await;

        let stop_result = self.tear_down(&mut child, &mut transaction).await;
        drop(markers);
        self.transition(LifecycleState::Stopped);

        match outcome {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Err(e)) => Err(e),
            Ok(Ok(value)) => stop_result.map(|()| value),
        }
    }

    async fn start_and_run<F, Fut, T>(
        &mut self,
        transaction: &mut TransactionScope,
        context: RunContext,
        block: F,
    ) -> E2eResult<T>
    where
        F: FnOnce(RunContext) -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        self.transition(LifecycleState::AwaitingReady);
        self.probe
            .wait_until_ready(&self.readiness_url(), self.config.readiness_timeout)
            .await?;
        self.hooks.run(HookPoint::AfterServerStart)?;
        info!("Server started on {}", context.base_url);

        if transaction.begin()? {
            self.transition(LifecycleState::TransactionOpen);
            self.hooks.run(HookPoint::AfterTransactionStart)?;
        }

        self.transition(LifecycleState::Running);
        block(context).await
    }

    async fn tear_down(
        &mut self,
        child: &mut ChildHandle,
        transaction: &mut TransactionScope,
    ) -> E2eResult<()> {
        self.transition(LifecycleState::TearingDown);

        let hook_result = self.hooks.run(HookPoint::BeforeServerStop);
        if let Err(e) = &hook_result {
            warn!("{}", e);
        }

        transaction.rollback();
        self.last_exit = self.supervisor.terminate(child, self.config.stop_timeout).await;

        hook_result.map_err(E2eError::from)
    }

    fn child_env(&self) -> Vec<(String, String)> {
        let mut env = self.config.test_mode_markers.clone();
        env.push(("HOST".to_string(), self.config.host.clone()));
        env.push(("PORT".to_string(), self.port.to_string()));
        env
    }
}

/// Default server launcher: `bin/server` when present, else `cargo run --`
pub fn default_server_command(root: &Path) -> Vec<String> {
    if root.join("bin/server").exists() {
        vec!["bin/server".to_string()]
    } else {
        vec!["cargo".to_string(), "run".to_string(), "--".to_string()]
    }
}

/// Sets test-mode markers in this process and removes them on drop
struct MarkerGuard {
    keys: Vec<String>,
}

impl MarkerGuard {
    fn set(markers: &[(String, String)]) -> Self {
        for (key, value) in markers {
            std::env::set_var(key, value);
        }
        Self {
            keys: markers.iter().map(|(k, _)| k.clone()).collect(),
        }
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            std::env::remove_var(key);
        }
    }
}
