//! `open` and `run`: start the server, then the test runner

use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use testbridge_common::{config::detect_install_folder, Configuration, Framework};
use testbridge_e2e::{RunnerMode, ServerConfig, ServerOrchestrator, TestRunner};

use crate::output;

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Test framework to launch
    #[arg(long, value_parser = parse_framework)]
    pub framework: Option<Framework>,

    /// Host the server binds to
    #[arg(long)]
    pub host: Option<String>,

    /// Port the server listens on (ephemeral when unset)
    #[arg(long)]
    pub port: Option<u16>,

    /// Folder holding the e2e helper, app_commands and cassettes
    #[arg(long)]
    pub install_folder: Option<PathBuf>,

    /// Path polled until the server answers
    #[arg(long)]
    pub readiness_path: Option<String>,

    /// Seconds to wait for the readiness path
    #[arg(long)]
    pub readiness_timeout: Option<u64>,

    /// Server command line; `{host}` and `{port}` are substituted
    #[arg(long)]
    pub server_command: Option<String>,
}

pub fn parse_framework(s: &str) -> Result<Framework, String> {
    s.parse::<Framework>().map_err(|e| e.to_string())
}

impl ServerArgs {
    /// Configuration file values overridden by command-line flags
    pub fn server_config(&self, config: &Configuration, config_present: bool) -> ServerConfig {
        let mut server = ServerConfig::from_configuration(config);

        if let Some(framework) = self.framework {
            server.framework = framework;
        }
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        if self.port.is_some() {
            server.port = self.port;
        }
        match &self.install_folder {
            Some(folder) => server.install_folder = folder.clone(),
            None if !config_present => {
                server.install_folder = detect_install_folder(Path::new("."));
                debug!("Detected install folder {}", server.install_folder.display());
            }
            None => {}
        }
        if let Some(path) = &self.readiness_path {
            server.readiness_path = path.clone();
        }
        if let Some(secs) = self.readiness_timeout {
            server.readiness_timeout = Duration::from_secs(secs);
        }
        if let Some(command) = &self.server_command {
            server.server_command = Some(command.split_whitespace().map(String::from).collect());
        }
        server
    }
}

/// Returns whether the runner succeeded
pub async fn execute(mode: RunnerMode, args: ServerArgs, config_path: &Path) -> anyhow::Result<bool> {
    let config_present = config_path.exists();
    let config = Configuration::load(config_path)?;
    let server = args.server_config(&config, config_present);

    info!(
        "Starting server for {} in {}",
        server.framework,
        server.install_folder.display()
    );

    // No transactional store here: the data lives in the server process
    let orchestrator = ServerOrchestrator::new(server)?;
    output::step(&format!("Server will listen on {}", orchestrator.base_url()));

    let mut runner = TestRunner::new(orchestrator);
    let passed = match mode {
        RunnerMode::Open => runner.open().await?,
        RunnerMode::Run => runner.run().await?,
    };

    if passed {
        output::success("Test runner finished");
    } else {
        output::failure("Test runner reported failures");
    }
    Ok(passed)
}
