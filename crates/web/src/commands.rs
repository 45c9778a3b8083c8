//! Command registry
//!
//! Commands come from two places: handlers registered by the embedding
//! application, and `*.sql` scripts found under `{install_folder}/app_commands`
//! at startup. Both run against the live application.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use testbridge_common::{Error, Result};

use crate::context::CommandContext;

/// One command invocation as received over HTTP
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command_name: String,
    pub options: Value,
    pub raw_body: Bytes,
    pub path_info: String,
}

impl CommandRequest {
    pub fn new(command_name: impl Into<String>, options: Value) -> Self {
        Self {
            command_name: command_name.into(),
            options,
            raw_body: Bytes::new(),
            path_info: String::new(),
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, ctx: &CommandContext, request: &CommandRequest) -> anyhow::Result<Value>;
}

/// Adapter for async closures
pub struct FnCommand<F>(pub F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(CommandContext, CommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, ctx: &CommandContext, request: &CommandRequest) -> anyhow::Result<Value> {
        (self.0)(ctx.clone(), request.clone()).await
    }
}

/// Runs a SQL script against the application database
pub struct SqlScript {
    path: PathBuf,
}

impl SqlScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CommandHandler for SqlScript {
    async fn call(&self, ctx: &CommandContext, _request: &CommandRequest) -> anyhow::Result<Value> {
        let db = ctx
            .database()
            .ok_or_else(|| anyhow::anyhow!("no database registered for {}", self.path.display()))?;
        let sql = tokio::fs::read_to_string(&self.path).await?;
        db.execute_batch(&sql)?;
        Ok(Value::Null)
    }
}

/// Where a command came from, for logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    Registered,
    Script(PathBuf),
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Registered => f.write_str("registered handler"),
            CommandSource::Script(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredCommand {
    pub name: String,
    pub source: CommandSource,
    pub handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for RegisteredCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCommand")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; replaces a script of the same name
    pub fn register<H: CommandHandler + 'static>(&mut self, name: &str, handler: H) -> Result<()> {
        validate_name(name)?;
        if let Some(previous) = self.commands.get(name) {
            warn!("Command {} ({}) replaced by a registered handler", name, previous.source);
        }
        self.commands.insert(
            name.to_string(),
            RegisteredCommand {
                name: name.to_string(),
                source: CommandSource::Registered,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Register an async closure taking the context and request by value
    pub fn register_fn<F, Fut>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(CommandContext, CommandRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, FnCommand(f))
    }

    /// Register every `*.sql` file under `dir`; returns how many were added
    ///
    /// Registered handlers take precedence over scripts with the same name.
    pub fn scan_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            debug!("No command directory at {}", dir.display());
            return Ok(0);
        }

        let mut added = 0;
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Internal(format!("scanning {}: {}", dir.display(), e)))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }

            let Some(name) = script_name(dir, path) else {
                warn!("Skipping command script with unusable name: {}", path.display());
                continue;
            };
            if self.commands.contains_key(&name) {
                debug!("Command {} already registered; skipping {}", name, path.display());
                continue;
            }

            self.commands.insert(
                name.clone(),
                RegisteredCommand {
                    name,
                    source: CommandSource::Script(path.to_path_buf()),
                    handler: Arc::new(SqlScript::new(path)),
                },
            );
            added += 1;
        }

        info!("Registered {} command scripts from {}", added, dir.display());
        Ok(added)
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredCommand> {
        validate_name(name).map_err(|_| Error::CommandNotFound {
            name: name.to_string(),
        })?;
        self.commands.get(name).ok_or_else(|| Error::CommandNotFound {
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.commands.keys()).finish()
    }
}

/// `/`-separated segments of `[A-Za-z0-9_.-]`, no `..`
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("invalid command name: {:?}", name)))
    }
}

fn script_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    let name = segments?.join("/");
    validate_name(&name).ok()?;
    Some(name)
}
