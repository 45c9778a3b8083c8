//! TestBridge configuration

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::{Error, Result};

/// Folders probed, in order, when no install folder is configured
const INSTALL_FOLDER_CANDIDATES: &[&str] = &[
    "e2e",
    "spec/e2e",
    "spec/cypress",
    "spec/playwright",
    "cypress",
    "playwright",
];

/// Browser test framework driving the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    #[default]
    Cypress,
    Playwright,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Cypress => "cypress",
            Framework::Playwright => "playwright",
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cypress" => Ok(Framework::Cypress),
            "playwright" => Ok(Framework::Playwright),
            other => Err(Error::InvalidConfig(format!("unknown framework: {}", other))),
        }
    }
}

/// When the `after_state_reset` hook fires relative to the destructive cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetHookOrder {
    BeforeCleanup,
    #[default]
    AfterCleanup,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Prefix prepended to the command and VCR endpoints
    pub api_prefix: String,

    /// Folder holding the helper file, `app_commands/` and cassettes
    pub install_folder: PathBuf,

    /// Install the command bridge and state reset layers
    pub use_middleware: bool,

    /// Install the explicit insert/eject cassette layer
    pub use_vcr_middleware: bool,

    /// Install the per-request cassette layer
    pub use_vcr_use_cassette_middleware: bool,

    /// Options forwarded to the cassette engine
    pub vcr_options: serde_json::Map<String, serde_json::Value>,

    /// Host the application server binds to
    pub server_host: String,

    /// Port for the application server (None = pick an ephemeral port)
    pub server_port: Option<u16>,

    /// Wrap the run in a rollback-only transaction
    pub transactional_server: bool,

    /// Path polled until the server answers
    pub server_readiness_path: String,

    /// Seconds to wait for readiness
    pub server_readiness_timeout: u64,

    /// Seconds to wait for a graceful exit before killing the server
    pub server_stop_timeout: u64,

    /// Command used to launch the application server (None = auto-detect)
    pub server_command: Option<Vec<String>>,

    /// Ordering of the `after_state_reset` hook
    pub state_reset_hook_order: ResetHookOrder,

    /// Deprecated spelling of `install_folder`
    #[serde(skip_serializing)]
    cypress_folder: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_prefix: String::new(),
            install_folder: PathBuf::from("spec/e2e"),
            use_middleware: true,
            use_vcr_middleware: false,
            use_vcr_use_cassette_middleware: false,
            vcr_options: serde_json::Map::new(),
            server_host: "localhost".to_string(),
            server_port: None,
            transactional_server: true,
            server_readiness_path: "/".to_string(),
            server_readiness_timeout: 5,
            server_stop_timeout: 10,
            server_command: None,
            state_reset_hook_order: ResetHookOrder::AfterCleanup,
            cypress_folder: None,
        }
    }
}

impl Configuration {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist. Environment overrides win over the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.migrate_deprecated();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn migrate_deprecated(&mut self) {
        if let Some(folder) = self.cypress_folder.take() {
            warn!("cypress_folder is deprecated, please use install_folder");
            self.install_folder = folder;
        }
    }

    /// Apply `CYPRESS_RAILS_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = env_non_empty("CYPRESS_RAILS_HOST") {
            self.server_host = host;
        }
        if let Some(port) = env_non_empty("CYPRESS_RAILS_PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::InvalidConfig(format!("CYPRESS_RAILS_PORT is not a port: {}", port)))?;
            self.server_port = Some(port);
        }
        if let Some(path) = env_non_empty("CYPRESS_RAILS_READINESS_PATH") {
            self.server_readiness_path = path;
        }
        if let Some(secs) = env_non_empty("CYPRESS_RAILS_READINESS_TIMEOUT") {
            self.server_readiness_timeout = secs.parse::<u64>().map_err(|_| {
                Error::InvalidConfig(format!("CYPRESS_RAILS_READINESS_TIMEOUT is not a number: {}", secs))
            })?;
        }
        Ok(())
    }

    /// Reject combinations that cannot be installed together
    pub fn validate(&self) -> Result<()> {
        if self.use_vcr_middleware && self.use_vcr_use_cassette_middleware {
            return Err(Error::InvalidConfig(
                "Configure only one VCR middleware at a time: use_vcr_middleware OR use_vcr_use_cassette_middleware"
                    .to_string(),
            ));
        }
        if !self.server_readiness_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "server_readiness_path must start with '/': {}",
                self.server_readiness_path
            )));
        }
        Ok(())
    }

    /// Deprecated accessor kept for callers migrating from `cypress_folder`
    #[deprecated(note = "use install_folder")]
    pub fn cypress_folder(&self) -> &Path {
        warn!("cypress_folder is deprecated, please use install_folder");
        &self.install_folder
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.server_readiness_timeout)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.server_stop_timeout)
    }

    /// Directory scanned for command scripts
    pub fn app_commands_dir(&self) -> PathBuf {
        self.install_folder.join("app_commands")
    }

    /// Cassette storage location; not overridable through `vcr_options`
    pub fn cassette_library_dir(&self) -> PathBuf {
        self.install_folder.join("fixtures").join("vcr_cassettes")
    }

    /// Prefix with any trailing slash removed
    pub fn normalized_api_prefix(&self) -> &str {
        self.api_prefix.trim_end_matches('/')
    }
}

/// Pick the first existing well-known install folder under `root`
pub fn detect_install_folder(root: &Path) -> PathBuf {
    INSTALL_FOLDER_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| root.join(candidate).exists())
        .unwrap_or_else(|| PathBuf::from("e2e"))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .and_then(|v| if v.trim().is_empty() { None } else { Some(v) })
}

static GLOBAL: Lazy<RwLock<Configuration>> = Lazy::new(|| RwLock::new(Configuration::default()));

/// Snapshot of the process-wide default configuration
pub fn global() -> Configuration {
    GLOBAL.read().clone()
}

/// Mutate the process-wide default configuration
pub fn configure<F: FnOnce(&mut Configuration)>(f: F) {
    f(&mut GLOBAL.write());
}

/// Restore the process-wide default configuration
pub fn reset_global() {
    *GLOBAL.write() = Configuration::default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.api_prefix, "");
        assert_eq!(config.install_folder, PathBuf::from("spec/e2e"));
        assert!(config.use_middleware);
        assert!(config.vcr_options.is_empty());
        assert_eq!(config.server_readiness_path, "/");
        assert_eq!(config.readiness_timeout(), Duration::from_secs(5));
        assert_eq!(config.state_reset_hook_order, ResetHookOrder::AfterCleanup);
        assert!(config.transactional_server);
    }

    #[test]
    fn test_parse_toml() {
        let config = Configuration::from_toml(
            r#"
            api_prefix = "/api"
            install_folder = "my/path"
            use_middleware = false
            server_readiness_path = "/health"
            server_readiness_timeout = 10
            state_reset_hook_order = "before_cleanup"

            [vcr_options]
            hook_into = "webmock"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.install_folder, PathBuf::from("my/path"));
        assert!(!config.use_middleware);
        assert_eq!(config.server_readiness_path, "/health");
        assert_eq!(config.readiness_timeout(), Duration::from_secs(10));
        assert_eq!(config.state_reset_hook_order, ResetHookOrder::BeforeCleanup);
        assert_eq!(config.vcr_options["hook_into"], "webmock");
    }

    #[test]
    fn test_deprecated_cypress_folder() {
        let config = Configuration::from_toml(r#"cypress_folder = "old/place""#).unwrap();
        assert_eq!(config.install_folder, PathBuf::from("old/place"));
    }

    #[test]
    fn test_both_vcr_middlewares_rejected() {
        let config = Configuration {
            use_vcr_middleware: true,
            use_vcr_use_cassette_middleware: true,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("CYPRESS_RAILS_HOST", "0.0.0.0");
        std::env::set_var("CYPRESS_RAILS_PORT", "4567");
        let config = Configuration::from_env();
        std::env::remove_var("CYPRESS_RAILS_HOST");
        std::env::remove_var("CYPRESS_RAILS_PORT");

        let config = config.unwrap();
        assert_eq!(config.server_host, "0.0.0.0");
        assert_eq!(config.server_port, Some(4567));
    }

    #[test]
    #[serial]
    fn test_invalid_port_override() {
        std::env::set_var("CYPRESS_RAILS_PORT", "not-a-port");
        let result = Configuration::from_env();
        std::env::remove_var("CYPRESS_RAILS_PORT");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::load(&dir.path().join("testbridge.toml")).unwrap();
        assert!(config.use_middleware);
    }

    #[test]
    fn test_detect_install_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_install_folder(dir.path()), PathBuf::from("e2e"));

        std::fs::create_dir_all(dir.path().join("spec/playwright")).unwrap();
        assert_eq!(detect_install_folder(dir.path()), PathBuf::from("spec/playwright"));

        std::fs::create_dir_all(dir.path().join("spec/cypress")).unwrap();
        assert_eq!(detect_install_folder(dir.path()), PathBuf::from("spec/cypress"));
    }

    #[test]
    fn test_framework_from_str() {
        assert_eq!("Playwright".parse::<Framework>().unwrap(), Framework::Playwright);
        assert!("selenium".parse::<Framework>().is_err());
    }

    #[test]
    #[serial]
    fn test_global_configure() {
        configure(|c| c.api_prefix = "/test".to_string());
        assert_eq!(global().api_prefix, "/test");
        reset_global();
        assert_eq!(global().api_prefix, "");
    }
}
