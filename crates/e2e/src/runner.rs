//! Test runner invocation - `open`, `run` and `init` around an orchestrated server

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use testbridge_common::Framework;

use crate::error::{E2eError, E2eResult};
use crate::orchestrator::{RunContext, ServerOrchestrator};

/// Interactive UI or headless run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    Open,
    Run,
}

/// Tool used to launch the framework binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    Yarn,
    Npx,
    Bare,
}

impl Launcher {
    /// `yarn` if available, else `npx`, else the framework binary itself
    pub fn detect() -> Self {
        if command_exists("yarn") {
            Launcher::Yarn
        } else if command_exists("npx") {
            Launcher::Npx
        } else {
            Launcher::Bare
        }
    }

    fn prefix(&self) -> Option<&'static str> {
        match self {
            Launcher::Yarn => Some("yarn"),
            Launcher::Npx => Some("npx"),
            Launcher::Bare => None,
        }
    }
}

/// Build the framework command line
pub fn runner_command(
    framework: Framework,
    mode: RunnerMode,
    launcher: Launcher,
    install_folder: &Path,
    base_url: &str,
) -> Vec<String> {
    let mut argv: Vec<String> = launcher.prefix().map(String::from).into_iter().collect();

    match framework {
        Framework::Cypress => {
            let action = match mode {
                RunnerMode::Open => "open",
                RunnerMode::Run => "run",
            };
            argv.extend([
                "cypress".to_string(),
                action.to_string(),
                "--project".to_string(),
                install_folder.display().to_string(),
                "--config".to_string(),
                format!("baseUrl={}", base_url),
            ]);
        }
        Framework::Playwright => {
            argv.extend(["playwright".to_string(), "test".to_string()]);
            if mode == RunnerMode::Open {
                argv.push("--ui".to_string());
            }
        }
    }

    argv
}

/// Whether `cmd` resolves on PATH
pub fn command_exists(cmd: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {} >/dev/null 2>&1", cmd))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs the browser test framework against an orchestrated server
pub struct TestRunner {
    orchestrator: ServerOrchestrator,
    launcher: Option<Launcher>,
}

impl TestRunner {
    pub fn new(orchestrator: ServerOrchestrator) -> Self {
        Self {
            orchestrator,
            launcher: None,
        }
    }

    /// Force a launcher instead of probing PATH
    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn orchestrator(&self) -> &ServerOrchestrator {
        &self.orchestrator
    }

    /// Start the server and open the interactive runner
    pub async fn open(&mut self) -> E2eResult<bool> {
        self.start(RunnerMode::Open).await
    }

    /// Start the server and run the suite headless; `Ok(false)` on test failures
    pub async fn run(&mut self) -> E2eResult<bool> {
        self.start(RunnerMode::Run).await
    }

    async fn start(&mut self, mode: RunnerMode) -> E2eResult<bool> {
        let framework = self.orchestrator.config().framework;
        let install_folder = self.orchestrator.config().install_folder.clone();
        let launcher = self.launcher.unwrap_or_else(Launcher::detect);

        self.orchestrator
            .run(|ctx: RunContext| async move {
                let argv = runner_command(framework, mode, launcher, &install_folder, &ctx.base_url);
                let description = match mode {
                    RunnerMode::Open => format!("Opening {} test runner", framework),
                    RunnerMode::Run => format!("Running {} tests", framework),
                };
                run_command(&argv, &description, &ctx).await
            })
            .await
    }

    /// Create the install folder if it does not exist yet
    pub fn init(framework: Framework, install_folder: &Path) -> E2eResult<PathBuf> {
        if !install_folder.exists() {
            info!("Creating {} directory...", install_folder.display());
            std::fs::create_dir_all(install_folder)?;
        }
        info!(
            "{} configuration initialized at {}",
            capitalize(framework.as_str()),
            install_folder.display()
        );
        Ok(install_folder.to_path_buf())
    }
}

async fn run_command(argv: &[String], description: &str, ctx: &RunContext) -> E2eResult<bool> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| E2eError::RunnerFailed("empty runner command".to_string()))?;

    info!("{}: {}", description, argv.join(" "));

    let status = Command::new(program)
        .args(args)
        .env("CYPRESS_BASE_URL", &ctx.base_url)
        .env("BASE_URL", &ctx.base_url)
        .status()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => E2eError::RunnerNotFound(program.clone()),
            _ => E2eError::Io(e),
        })?;

    Ok(status.success())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
