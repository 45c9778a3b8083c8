//! `init`: create the install folder and a starter configuration

use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

use testbridge_common::{config::detect_install_folder, Configuration, Framework};
use testbridge_e2e::TestRunner;

use crate::commands::server::parse_framework;
use crate::output;

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// Test framework the folder is for
    #[arg(long, default_value = "cypress", value_parser = parse_framework)]
    pub framework: Framework,

    /// Folder to create (detected when unset)
    #[arg(long)]
    pub install_folder: Option<PathBuf>,
}

pub fn execute(args: InitArgs, config_path: &Path) -> anyhow::Result<()> {
    let install_folder = args
        .install_folder
        .unwrap_or_else(|| detect_install_folder(Path::new(".")));

    let folder = TestRunner::init(args.framework, &install_folder)?;
    std::fs::create_dir_all(folder.join("app_commands"))?;

    if config_path.exists() {
        info!("Keeping existing {}", config_path.display());
    } else {
        let mut config = Configuration::default();
        config.install_folder = folder.clone();
        config.save(config_path)?;
        output::success(&format!("Wrote {}", config_path.display()));
    }

    output::success(&format!("{} ready at {}", args.framework, folder.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("e2e");
        let config_path = dir.path().join("testbridge.toml");

        let args = InitArgs {
            framework: Framework::Playwright,
            install_folder: Some(folder.clone()),
        };
        execute(args.clone(), &config_path).unwrap();

        assert!(folder.join("app_commands").is_dir());
        let config = Configuration::load(&config_path).unwrap();
        assert_eq!(config.install_folder, folder);

        // Existing configuration is left untouched
        std::fs::write(&config_path, "api_prefix = \"/api\"\n").unwrap();
        execute(args, &config_path).unwrap();
        let config = Configuration::load(&config_path).unwrap();
        assert_eq!(config.api_prefix, "/api");
    }
}
