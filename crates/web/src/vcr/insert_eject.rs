//! Explicit cassette session: one request inserts, a later one ejects

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::error;

use crate::bridge::{read_body, BeforeRequest};
use crate::error::{BridgeError, BridgeResult};

use super::Recorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VcrRoute {
    Insert,
    Eject,
}

/// Serves `{prefix}/__e2e__/vcr/insert` and `{prefix}/__e2e__/vcr/eject`
#[derive(Clone)]
pub struct VcrInsertEjectLayer {
    recorder: Arc<Recorder>,
    insert_path: String,
    eject_path: String,
    before_request: Option<BeforeRequest>,
}

impl VcrInsertEjectLayer {
    pub fn new(recorder: Arc<Recorder>, api_prefix: &str) -> Self {
        let prefix = api_prefix.trim_end_matches('/');
        Self {
            recorder,
            insert_path: format!("{}/__e2e__/vcr/insert", prefix),
            eject_path: format!("{}/__e2e__/vcr/eject", prefix),
            before_request: None,
        }
    }

    pub fn with_before_request(mut self, hook: Option<BeforeRequest>) -> Self {
        self.before_request = hook;
        self
    }

    fn route(&self, path: &str) -> Option<VcrRoute> {
        if path == self.insert_path {
            Some(VcrRoute::Insert)
        } else if path == self.eject_path {
            Some(VcrRoute::Eject)
        } else {
            None
        }
    }
}

impl<S> Layer<S> for VcrInsertEjectLayer {
    type Service = VcrInsertEjectService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        VcrInsertEjectService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct VcrInsertEjectService<S> {
    inner: S,
    layer: VcrInsertEjectLayer,
}

impl<S> Service<Request> for VcrInsertEjectService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let Some(route) = self.layer.route(req.uri().path()) else {
            let not_ready_inner = self.inner.clone();
            let mut inner = std::mem::replace(&mut self.inner, not_ready_inner);
            return Box::pin(async move { inner.call(req).await });
        };

        let layer = self.layer.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            if let Some(response) = layer.before_request.as_ref().and_then(|hook| hook(&parts)) {
                return Ok(response);
            }

            let result = match route {
                VcrRoute::Insert => insert(&layer.recorder, body).await,
                VcrRoute::Eject => layer.recorder.eject_cassette().map(|_| ()).map_err(Into::into),
            };

            Ok(match result {
                Ok(()) => (StatusCode::CREATED, Json(json!({ "message": "OK" }))).into_response(),
                Err(e) => {
                    error!("{} failed: {}", parts.uri.path(), e);
                    let backtrace = match &e {
                        BridgeError::Execution { backtrace, .. } => backtrace.clone(),
                        _ => Vec::new(),
                    };
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "message": e.to_string(), "backtrace": backtrace })),
                    )
                        .into_response()
                }
            })
        })
    }
}

async fn insert(recorder: &Recorder, body: Body) -> BridgeResult<()> {
    let bytes = read_body(body).await?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| BridgeError::BadRequest(format!("insert body is not JSON: {}", e)))?;
    let (name, options) = parse_insert(&value)?;
    recorder.insert_cassette(&name, &options)?;
    Ok(())
}

/// Accepts `["name", {options}]` or `{"name": ..., "options": {...}}`
fn parse_insert(value: &Value) -> BridgeResult<(String, Map<String, Value>)> {
    let (name, options) = match value {
        Value::Array(items) => (items.first(), items.get(1)),
        Value::Object(obj) => (obj.get("name"), obj.get("options")),
        _ => (None, None),
    };

    let name = name
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| BridgeError::BadRequest("cassette name is required".to_string()))?;
    let options = options
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Ok((name.to_string(), options))
}
