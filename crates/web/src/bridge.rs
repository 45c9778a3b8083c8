//! HTTP bridge into the running application
//!
//! [`CommandBridgeLayer`] sits in front of the application router. Requests to
//! the command and reset paths are answered here and never reach the
//! application; every other request passes through untouched.
//!
//! | path | behaviour |
//! |------|-----------|
//! | `{prefix}/__e2e__/command`, `{prefix}/__cypress__/command` | run the commands named in the JSON body |
//! | `{prefix}/__e2e__/command/{name}` | run `name`, body as options |
//! | `/__cypress__/reset_state`, `/cypress_rails_reset_state` | reset application state |

use axum::{
    body::Body,
    extract::Request,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;
use tower::{Layer, Service};
use tracing::{debug, error, info};

use testbridge_common::{
    BulkCleanable, Clearable, Configuration, Database, LifecycleHooks, Result,
};

use crate::commands::{CommandRegistry, CommandRequest, RegisteredCommand};
use crate::context::CommandContext;
use crate::error::{BridgeError, BridgeResult};
use crate::helper::{load_helper, HelperContext};
use crate::state_reset::{StateReset, RESET_COMPLETED};
use crate::vcr::Recorder;

/// Inspect a request head before a bridge endpoint handles it; returning a
/// response short-circuits the endpoint
pub type BeforeRequest = Arc<dyn Fn(&Parts) -> Option<Response> + Send + Sync>;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub(crate) async fn read_body(body: Body) -> BridgeResult<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| BridgeError::BadRequest(format!("failed to read body: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BridgeRoute {
    /// Names come from the body when `None`
    Command(Option<String>),
    Reset,
}

pub struct CommandBridge {
    registry: CommandRegistry,
    context: CommandContext,
    install_folder: PathBuf,
    helper: OnceCell<Arc<HelperContext>>,
    reset: StateReset,
    command_paths: Vec<String>,
    named_command_prefix: String,
    before_request: Option<BeforeRequest>,
    // One command or reset at a time
    lock: Mutex<()>,
}

impl CommandBridge {
    pub fn builder(config: &Configuration) -> CommandBridgeBuilder {
        CommandBridgeBuilder::new(config)
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn layer(self: &Arc<Self>) -> CommandBridgeLayer {
        CommandBridgeLayer::new(self.clone())
    }

    fn route(&self, path: &str) -> Option<BridgeRoute> {
        if StateReset::is_reset_path(path) {
            return Some(BridgeRoute::Reset);
        }
        if self.command_paths.iter().any(|p| p == path) {
            return Some(BridgeRoute::Command(None));
        }
        path.strip_prefix(&self.named_command_prefix)
            .filter(|name| !name.is_empty())
            .map(|name| BridgeRoute::Command(Some(name.to_string())))
    }

    /// Helper context, loaded on first use
    fn helper(&self) -> Result<Arc<HelperContext>> {
        self.helper
            .get_or_try_init(|| load_helper(&self.install_folder).map(Arc::new))
            .cloned()
    }

    /// Resolve every command, then run them in order
    ///
    /// Nothing runs if any name is unknown. The first failing command stops the
    /// batch and is reported with its error chain.
    pub async fn execute(&self, requests: Vec<CommandRequest>) -> BridgeResult<Vec<Value>> {
        let resolved: Vec<(RegisteredCommand, CommandRequest)> = requests
            .into_iter()
            .map(|req| match self.registry.resolve(&req.command_name) {
                Ok(cmd) => Ok((cmd.clone(), req)),
                Err(_) => Err(BridgeError::NotFound(req.command_name)),
            })
            .collect::<BridgeResult<_>>()?;

        let _guard = self.lock.lock().await;

        let helper = self.helper().map_err(|e| {
            let err = anyhow::Error::new(e).context("failed to load helper context");
            error!("{:?}", err);
            BridgeError::execution("helper", &err)
        })?;
        let ctx = self.context.clone().with_helper(helper);

        let mut results = Vec::with_capacity(resolved.len());
        for (command, request) in resolved {
            info!("Executing command {} ({})", command.name, command.source);
            let outcome = AssertUnwindSafe(command.handler.call(&ctx, &request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("command panicked: {}", panic_message(&*panic)))
                });
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    error!("fail to execute {}: {}", command.source, e);
                    error!("{:?}", e);
                    return Err(BridgeError::execution(&command.name, &e));
                }
            }
        }
        Ok(results)
    }

    pub async fn reset_state(&self) -> BridgeResult<()> {
        let _guard = self.lock.lock().await;
        self.reset.reset().map_err(|e| {
            error!("State reset failed: {}", e);
            BridgeError::from(e)
        })
    }

    async fn handle(&self, route: BridgeRoute, req: Request) -> Response {
        let (parts, body) = req.into_parts();

        match route {
            BridgeRoute::Reset => match self.reset_state().await {
                Ok(()) => (StatusCode::OK, RESET_COMPLETED).into_response(),
                Err(e) => e.into_response(),
            },
            BridgeRoute::Command(name) => {
                if let Some(response) = self.before_request.as_ref().and_then(|hook| hook(&parts)) {
                    debug!("before_request short-circuited {}", parts.uri.path());
                    return response;
                }
                let result = async {
                    let body = read_body(body).await?;
                    let requests = parse_commands(name, &parts, body)?;
                    self.execute(requests).await
                }
                .await;

                match result {
                    Ok(results) => (StatusCode::CREATED, Json(results)).into_response(),
                    Err(e) => e.into_response(),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Turn a command request body into invocations
fn parse_commands(name: Option<String>, parts: &Parts, body: Bytes) -> BridgeResult<Vec<CommandRequest>> {
    let path_info = parts.uri.path().to_string();

    if let Some(name) = name {
        let options = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| BridgeError::BadRequest(format!("command options are not JSON: {}", e)))?
        };
        return Ok(vec![CommandRequest {
            command_name: name,
            options,
            raw_body: body,
            path_info,
        }]);
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| BridgeError::BadRequest(format!("command body is not JSON: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        _ => return Err(BridgeError::BadRequest("expected a command object or array".to_string())),
    };

    items
        .into_iter()
        .map(|item| {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| BridgeError::BadRequest("command name is required".to_string()))?;
            Ok(CommandRequest {
                command_name: name.to_string(),
                options: item.get("options").cloned().unwrap_or(Value::Null),
                raw_body: body.clone(),
                path_info: path_info.clone(),
            })
        })
        .collect()
}

pub struct CommandBridgeBuilder {
    api_prefix: String,
    install_folder: PathBuf,
    commands_dir: Option<PathBuf>,
    registry: CommandRegistry,
    context: CommandContext,
    reset: StateReset,
    before_request: Option<BeforeRequest>,
}

impl CommandBridgeBuilder {
    pub fn new(config: &Configuration) -> Self {
        Self {
            api_prefix: config.normalized_api_prefix().to_string(),
            install_folder: config.install_folder.clone(),
            commands_dir: Some(config.app_commands_dir()),
            registry: CommandRegistry::new(),
            context: CommandContext::new(config.install_folder.clone()),
            reset: StateReset::new().with_hook_order(config.state_reset_hook_order),
            before_request: None,
        }
    }

    /// Handlers registered by the application; scripts are scanned on top
    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Skip the `app_commands` scan
    pub fn without_scripts(mut self) -> Self {
        self.commands_dir = None;
        self
    }

    pub fn with_state<T: Any + Send + Sync>(mut self, state: Arc<T>) -> Self {
        self.context = self.context.with_state(state);
        self
    }

    /// Database visible to commands and wiped on reset
    pub fn with_database(mut self, database: Database) -> Self {
        self.reset = self.reset.with_store(Arc::new(database.clone()));
        self.context = self.context.with_database(database);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.context = self.context.with_recorder(recorder);
        self
    }

    pub fn with_cleaner(mut self, cleaner: Arc<dyn BulkCleanable>) -> Self {
        self.reset = self.reset.with_cleaner(cleaner);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Clearable>) -> Self {
        self.reset = self.reset.with_cache(cache);
        self
    }

    pub fn with_reloader(mut self, reloader: Arc<dyn Clearable>) -> Self {
        self.reset = self.reset.with_reloader(reloader);
        self
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.reset = self.reset.with_hooks(hooks);
        self
    }

    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts) -> Option<Response> + Send + Sync + 'static,
    {
        self.before_request = Some(Arc::new(hook));
        self
    }

    pub fn build(mut self) -> Result<Arc<CommandBridge>> {
        if let Some(dir) = &self.commands_dir {
            self.registry.scan_dir(dir)?;
        }

        let prefix = &self.api_prefix;
        Ok(Arc::new(CommandBridge {
            command_paths: vec![
                format!("{}/__e2e__/command", prefix),
                format!("{}/__cypress__/command", prefix),
            ],
            named_command_prefix: format!("{}/__e2e__/command/", prefix),
            registry: self.registry,
            context: self.context,
            install_folder: self.install_folder,
            helper: OnceCell::new(),
            reset: self.reset,
            before_request: self.before_request,
            lock: Mutex::new(()),
        }))
    }
}

/// Tower layer answering command and reset requests
#[derive(Clone)]
pub struct CommandBridgeLayer {
    bridge: Arc<CommandBridge>,
}

impl CommandBridgeLayer {
    pub fn new(bridge: Arc<CommandBridge>) -> Self {
        Self { bridge }
    }

    pub fn before_request(&self) -> Option<BeforeRequest> {
        self.bridge.before_request.clone()
    }
}

impl<S> Layer<S> for CommandBridgeLayer {
    type Service = CommandBridgeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CommandBridgeService {
            inner,
            bridge: self.bridge.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CommandBridgeService<S> {
    inner: S,
    bridge: Arc<CommandBridge>,
}

impl<S> Service<Request> for CommandBridgeService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        match self.bridge.route(req.uri().path()) {
            Some(route) => {
                let bridge = self.bridge.clone();
                Box::pin(async move { Ok(bridge.handle(route, req).await) })
            }
            None => {
                let not_ready_inner = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, not_ready_inner);
                Box::pin(async move { inner.call(req).await })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(prefix: &str) -> Configuration {
        let mut config = Configuration::default();
        config.api_prefix = prefix.to_string();
        config.install_folder = PathBuf::from("/nonexistent/e2e");
        config
    }

    fn bridge(prefix: &str) -> Arc<CommandBridge> {
        CommandBridge::builder(&config(prefix)).build().unwrap()
    }

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_routes() {
        let bridge = bridge("/api");
        assert_eq!(bridge.route("/api/__e2e__/command"), Some(BridgeRoute::Command(None)));
        assert_eq!(bridge.route("/api/__cypress__/command"), Some(BridgeRoute::Command(None)));
        assert_eq!(
            bridge.route("/api/__e2e__/command/scenarios/basic"),
            Some(BridgeRoute::Command(Some("scenarios/basic".into())))
        );
        assert_eq!(bridge.route("/cypress_rails_reset_state"), Some(BridgeRoute::Reset));
        assert_eq!(bridge.route("/__cypress__/reset_state"), Some(BridgeRoute::Reset));

        assert_eq!(bridge.route("/__e2e__/command"), None);
        assert_eq!(bridge.route("/api/__e2e__/command/"), None);
        assert_eq!(bridge.route("/api/users"), None);
    }

    #[test]
    fn test_parse_body_forms() {
        let head = parts("/__e2e__/command");

        let single = parse_commands(
            None,
            &head,
            Bytes::from(json!({ "name": "seed", "options": { "count": 2 } }).to_string()),
        )
        .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].command_name, "seed");
        assert_eq!(single[0].options, json!({ "count": 2 }));
        assert_eq!(single[0].path_info, "/__e2e__/command");

        let batch = parse_commands(
            None,
            &head,
            Bytes::from(json!([{ "name": "clean" }, { "name": "seed" }]).to_string()),
        )
        .unwrap();
        assert_eq!(
            batch.iter().map(|r| r.command_name.as_str()).collect::<Vec<_>>(),
            vec!["clean", "seed"]
        );
        assert_eq!(batch[0].options, Value::Null);

        assert!(parse_commands(None, &head, Bytes::from_static(b"seed")).is_err());
        assert!(parse_commands(None, &head, Bytes::from_static(b"[{}]")).is_err());
    }

    #[test]
    fn test_parse_named_command() {
        let head = parts("/__e2e__/command/seed");
        let reqs = parse_commands(Some("seed".into()), &head, Bytes::from_static(b"{\"n\":1}")).unwrap();
        assert_eq!(reqs[0].options, json!({ "n": 1 }));

        let reqs = parse_commands(Some("seed".into()), &head, Bytes::new()).unwrap();
        assert_eq!(reqs[0].options, Value::Null);

        let err = parse_commands(Some("seed".into()), &head, Bytes::from_static(b"{count: 2")).unwrap_err();
        assert!(matches!(err, BridgeError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_command_runs_nothing() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();

        let mut registry = CommandRegistry::new();
        registry
            .register_fn("seed", move |_ctx, _req| {
                let flag = flag.clone();
                async move {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .unwrap();

        let bridge = CommandBridge::builder(&config(""))
            .with_registry(registry)
            .build()
            .unwrap();

        let err = bridge
            .execute(vec![
                CommandRequest::new("seed", Value::Null),
                CommandRequest::new("missing", Value::Null),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(name) if name == "missing"));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_command_becomes_execution_error() {
        let mut registry = CommandRegistry::new();
        registry
            .register_fn("boom", |_ctx, _req| async {
                let missing: Option<u32> = None;
                Ok(Value::from(missing.unwrap()))
            })
            .unwrap();
        registry
            .register_fn("ok", |_ctx, _req| async { Ok(Value::from("fine")) })
            .unwrap();

        let bridge = CommandBridge::builder(&config(""))
            .with_registry(registry)
            .build()
            .unwrap();

        let err = bridge
            .execute(vec![CommandRequest::new("boom", Value::Null)])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            BridgeError::Execution { command, message, .. } => {
                assert_eq!(command, "boom");
                assert!(message.contains("command panicked"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The lock is released and later commands still run
        let results = bridge
            .execute(vec![CommandRequest::new("ok", Value::Null)])
            .await
            .unwrap();
        assert_eq!(results, vec![Value::from("fine")]);
    }
}
