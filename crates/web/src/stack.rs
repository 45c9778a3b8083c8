//! Install the bridge and cassette layers around an application router

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use testbridge_common::{Configuration, Result};

use crate::bridge::CommandBridge;
use crate::vcr::{Recorder, VcrInsertEjectLayer, VcrUseCassetteLayer};

/// Layers enabled by a [`Configuration`]
///
/// Outermost first: command bridge and state reset, explicit cassette
/// endpoints, per-request cassette, application.
pub struct BridgeStack {
    config: Configuration,
    bridge: Option<Arc<CommandBridge>>,
    recorder: Option<Arc<Recorder>>,
    trace_requests: bool,
}

impl BridgeStack {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            bridge: None,
            recorder: None,
            trace_requests: false,
        }
    }

    /// Use a bridge built by the application instead of a bare default
    pub fn with_bridge(mut self, bridge: Arc<CommandBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Share a recorder with the application's outbound HTTP code
    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Log every request passing through the stack
    pub fn with_request_tracing(mut self) -> Self {
        self.trace_requests = true;
        self
    }

    pub fn install(self, app: Router) -> Result<Router> {
        self.config.validate()?;
        let config = &self.config;

        let mut router = Router::new().fallback_service(app);

        let recorder = if config.use_vcr_middleware || config.use_vcr_use_cassette_middleware {
            Some(
                self.recorder
                    .clone()
                    .unwrap_or_else(|| Arc::new(Recorder::from_configuration(config))),
            )
        } else {
            None
        };

        let bridge = match (&self.bridge, config.use_middleware) {
            (Some(bridge), true) => Some(bridge.clone()),
            (None, true) => Some(CommandBridge::builder(config).build()?),
            (_, false) => None,
        };

        if let Some(recorder) = recorder.as_ref() {
            if config.use_vcr_use_cassette_middleware {
                info!("Installing per-request cassette layer");
                router = router.layer(VcrUseCassetteLayer::new(recorder.clone()));
            } else {
                info!("Installing cassette insert/eject endpoints");
                let before_request = bridge.as_ref().and_then(|b| b.layer().before_request());
                router = router.layer(
                    VcrInsertEjectLayer::new(recorder.clone(), config.normalized_api_prefix())
                        .with_before_request(before_request),
                );
            }
        }

        if let Some(bridge) = bridge {
            info!(
                "Installing command bridge ({} commands)",
                bridge.registry().len()
            );
            router = router.layer(bridge.layer());
        }

        if self.trace_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        Ok(router)
    }
}
