//! Per-request cassette: insert before the request, eject after

use axum::{
    extract::{Query, Request},
    http::Uri,
    response::Response,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, error};

use super::Recorder;

/// Cassette name for a request: the path, plus the operation for GraphQL calls
pub fn cassette_name(uri: &Uri) -> String {
    let path = uri.path();
    if path.trim_end_matches('/').ends_with("/graphql") {
        let operation = Query::<HashMap<String, String>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(params)| params.get("operation").cloned())
            .filter(|op| !op.is_empty());
        if let Some(operation) = operation {
            return format!("{}/{}", path.trim_end_matches('/'), operation);
        }
    }
    path.to_string()
}

#[derive(Clone)]
pub struct VcrUseCassetteLayer {
    recorder: Arc<Recorder>,
}

impl VcrUseCassetteLayer {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }
}

impl<S> Layer<S> for VcrUseCassetteLayer {
    type Service = VcrUseCassetteService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        VcrUseCassetteService {
            inner,
            recorder: self.recorder.clone(),
        }
    }
}

#[derive(Clone)]
pub struct VcrUseCassetteService<S> {
    inner: S,
    recorder: Arc<Recorder>,
}

impl<S> Service<Request> for VcrUseCassetteService<S>
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
        let not_ready_inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, not_ready_inner);
        let recorder = self.recorder.clone();

        Box::pin(async move {
            if recorder.is_inserted() {
                debug!("Cassette already inserted; leaving it in place");
                return inner.call(req).await;
            }

            let name = cassette_name(req.uri());
            let mut options = Map::new();
            options.insert("record".to_string(), Value::from("new_episodes"));

            if let Err(e) = recorder.insert_cassette(&name, &options) {
                error!("Failed to insert cassette {}: {}", name, e);
                return inner.call(req).await;
            }

            // Ejects on completion, cancellation and unwinding alike
            let _scope = CassetteScope { recorder, name };
            inner.call(req).await
        })
    }
}

/// Ejects the scope's cassette when dropped
struct CassetteScope {
    recorder: Arc<Recorder>,
    name: String,
}

impl Drop for CassetteScope {
    fn drop(&mut self) {
        // Someone else may have ejected ours and inserted their own
        if self.recorder.current_cassette().as_deref() != Some(self.name.as_str()) {
            debug!("Cassette {} already ejected", self.name);
            return;
        }
        if let Err(e) = self.recorder.eject_cassette() {
            error!("Failed to eject cassette {}: {}", self.name, e);
        }
    }
}
