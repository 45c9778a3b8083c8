//! One-time helper context shared by every command
//!
//! The helper file is a TOML table living in the install folder. It is looked
//! up in this order:
//!
//! 1. `{install_folder}/e2e_helper.toml`
//! 2. `{install_folder}/cypress_helper.toml` (deprecated name)
//! 3. `{install_folder}/cypress/e2e_helper.toml` or
//!    `{install_folder}/playwright/e2e_helper.toml` (legacy layout)
//!
//! A missing helper is not an error: commands that need no shared setup still run.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use testbridge_common::Result;

const CANONICAL_HELPER: &str = "e2e_helper.toml";
const DEPRECATED_HELPER: &str = "cypress_helper.toml";
const LEGACY_SUBDIRS: &[&str] = &["cypress", "playwright"];

/// Where the helper file was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperLocation {
    Canonical,
    DeprecatedName,
    LegacySubdirectory,
}

/// Values loaded from the helper file
#[derive(Debug, Clone, Default)]
pub struct HelperContext {
    source: Option<PathBuf>,
    values: toml::Table,
}

impl HelperContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_table(values: toml::Table) -> Self {
        Self {
            source: None,
            values,
        }
    }

    /// File the context was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn values(&self) -> &toml::Table {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Find the helper file without reading it
pub fn resolve_helper_path(install_folder: &Path) -> Option<(PathBuf, HelperLocation)> {
    let canonical = install_folder.join(CANONICAL_HELPER);
    if canonical.is_file() {
        return Some((canonical, HelperLocation::Canonical));
    }

    let deprecated = install_folder.join(DEPRECATED_HELPER);
    if deprecated.is_file() {
        return Some((deprecated, HelperLocation::DeprecatedName));
    }

    LEGACY_SUBDIRS
        .iter()
        .map(|dir| install_folder.join(dir).join(CANONICAL_HELPER))
        .find(|p| p.is_file())
        .map(|p| (p, HelperLocation::LegacySubdirectory))
}

/// Load the helper context, warning about deprecated locations
pub fn load_helper(install_folder: &Path) -> Result<HelperContext> {
    let Some((path, location)) = resolve_helper_path(install_folder) else {
        warn!(
            "could not find {} in {}; commands run without helper context",
            CANONICAL_HELPER,
            install_folder.display()
        );
        return Ok(HelperContext::empty());
    };

    match location {
        HelperLocation::Canonical => {}
        HelperLocation::DeprecatedName => warn!(
            "{} is deprecated, please rename the file to {}",
            DEPRECATED_HELPER, CANONICAL_HELPER
        ),
        HelperLocation::LegacySubdirectory => warn_legacy_layout(install_folder, &path),
    }

    let content = std::fs::read_to_string(&path)?;
    let values: toml::Table = toml::from_str(&content)?;
    info!("Loaded helper context from {}", path.display());

    Ok(HelperContext {
        source: Some(path),
        values,
    })
}

fn warn_legacy_layout(install_folder: &Path, found: &Path) {
    let folder = install_folder.display();
    warn!(
        "\n\
         ================================================================\n\
         DEPRECATED helper file location: {found}\n\
         \n\
         The framework subdirectory layout is no longer supported and\n\
         will stop working in a future release. Move the helper file and\n\
         the app_commands directory up one level:\n\
         \n\
           {folder}/e2e_helper.toml\n\
           {folder}/app_commands/\n\
         \n\
         then point `install_folder` at {folder}.\n\
         ================================================================",
        found = found.display(),
        folder = folder,
    );
}
