//! Lifecycle hook plugins.
//!
//! Plugins attach behavior at named points of the request lifecycle. The
//! manager keeps plugins sorted by priority bucket (registration order
//! breaks ties) and dispatches each hook in ascending priority; for hooks
//! with a return value the first non-`None` result short-circuits
//! dispatch. Plugin panics are caught and logged and, unless the manager
//! is configured to abort, never break the chain.
//!
//! The hook set is fixed (no runtime reflection): a plugin overrides the
//! trait methods for the hooks it cares about and inherits no-op defaults
//! for the rest.

use crate::models::error::GatewayError;
use crate::models::http::{GatewayRequest, GatewayResponse};
use crate::models::route::Route;
use log::{error, info};
use serde_json::json;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Named lifecycle hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginHook {
    Startup,
    Shutdown,
    PreRequest,
    PostRequest,
    PreResponse,
    PostResponse,
    OnError,
    OnRouteMatch,
    OnBackendSelect,
    OnMetrics,
}

/// Priority buckets; lower values dispatch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginPriority {
    Highest = 0,
    High = 25,
    Normal = 50,
    Low = 75,
    Lowest = 100,
}

/// A gateway plugin. All hook methods default to no-ops.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn priority(&self) -> PluginPriority {
        PluginPriority::Normal
    }

    fn enabled(&self) -> bool {
        true
    }

    fn on_startup(&self) {}

    fn on_shutdown(&self) {}

    /// May mutate the request or short-circuit with a response.
    fn pre_request(&self, _request: &mut GatewayRequest) -> Option<GatewayResponse> {
        None
    }

    /// Runs after the backend produced a response, before the middleware
    /// post chain. Returning a response replaces the current one.
    fn post_request(
        &self,
        _request: &GatewayRequest,
        _response: &GatewayResponse,
    ) -> Option<GatewayResponse> {
        None
    }

    /// Runs immediately before the response is written to the client.
    fn pre_response(&self, _request: &GatewayRequest, _response: &mut GatewayResponse) {}

    /// Runs after the response has been written.
    fn post_response(&self, _request: &GatewayRequest, _response: &GatewayResponse) {}

    /// May convert a pipeline error into a response.
    fn on_error(&self, _request: &GatewayRequest, _error: &GatewayError) -> Option<GatewayResponse> {
        None
    }

    fn on_route_match(&self, _request: &GatewayRequest, _route: &Route) {}

    fn on_backend_select(&self, _request: &GatewayRequest, _backend_address: &str) {}

    fn on_metrics(&self, _request: &GatewayRequest, _response: &GatewayResponse, _latency_ms: f64) {}
}

/// Priority-ordered plugin registry and hook dispatcher.
pub struct PluginManager {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    abort_on_error: bool,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            abort_on_error: false,
        }
    }

    /// When set, a panicking plugin aborts dispatch of the current hook
    /// instead of being skipped.
    pub fn with_abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    /// Registers a plugin, keeping the list sorted by priority with
    /// registration order as the tiebreaker (stable sort).
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> &Self {
        info!("Registered plugin: {} v{}", plugin.name(), plugin.version());
        let mut plugins = self.plugins.write().unwrap();
        plugins.push(plugin);
        plugins.sort_by_key(|p| p.priority());
        self
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut plugins = self.plugins.write().unwrap();
        let before = plugins.len();
        plugins.retain(|p| p.name() != name);
        plugins.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .unwrap()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn active_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.enabled())
            .cloned()
            .collect()
    }

    /// Runs a hook body over every active plugin; a `Some` return value
    /// short-circuits.
    fn dispatch<T>(
        &self,
        hook: PluginHook,
        mut body: impl FnMut(&dyn Plugin) -> Option<T>,
    ) -> Option<T> {
        for plugin in self.active_plugins() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                body(plugin.as_ref())
            }));
            match outcome {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(_) => {
                    error!("Plugin '{}' panicked in {:?}", plugin.name(), hook);
                    if self.abort_on_error {
                        return None;
                    }
                }
            }
        }
        None
    }

    pub fn startup(&self) {
        self.dispatch::<()>(PluginHook::Startup, |p| {
            p.on_startup();
            None
        });
    }

    pub fn shutdown(&self) {
        self.dispatch::<()>(PluginHook::Shutdown, |p| {
            p.on_shutdown();
            None
        });
    }

    pub fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        self.dispatch(PluginHook::PreRequest, |p| p.pre_request(request))
    }

    pub fn post_request(
        &self,
        request: &GatewayRequest,
        response: &GatewayResponse,
    ) -> Option<GatewayResponse> {
        self.dispatch(PluginHook::PostRequest, |p| p.post_request(request, response))
    }

    pub fn pre_response(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        self.dispatch::<()>(PluginHook::PreResponse, |p| {
            p.pre_response(request, response);
            None
        });
    }

    pub fn post_response(&self, request: &GatewayRequest, response: &GatewayResponse) {
        self.dispatch::<()>(PluginHook::PostResponse, |p| {
            p.post_response(request, response);
            None
        });
    }

    pub fn on_error(
        &self,
        request: &GatewayRequest,
        gateway_error: &GatewayError,
    ) -> Option<GatewayResponse> {
        self.dispatch(PluginHook::OnError, |p| p.on_error(request, gateway_error))
    }

    pub fn on_route_match(&self, request: &GatewayRequest, route: &Route) {
        self.dispatch::<()>(PluginHook::OnRouteMatch, |p| {
            p.on_route_match(request, route);
            None
        });
    }

    pub fn on_backend_select(&self, request: &GatewayRequest, backend_address: &str) {
        self.dispatch::<()>(PluginHook::OnBackendSelect, |p| {
            p.on_backend_select(request, backend_address);
            None
        });
    }

    pub fn on_metrics(&self, request: &GatewayRequest, response: &GatewayResponse, latency_ms: f64) {
        self.dispatch::<()>(PluginHook::OnMetrics, |p| {
            p.on_metrics(request, response, latency_ms);
            None
        });
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags each request with a UUID, propagated as `X-Request-ID` both
/// upstream and on the response.
pub struct RequestIdPlugin;

impl Plugin for RequestIdPlugin {
    fn name(&self) -> &str {
        "request_id"
    }

    fn priority(&self) -> PluginPriority {
        PluginPriority::Highest
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        let request_id = Uuid::new_v4().to_string();
        request.set_header("X-Request-ID", request_id.clone());
        request.set_context("request_id", json!(request_id));
        None
    }

    fn pre_response(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        if let Some(id) = request.context("request_id").and_then(|v| v.as_str()) {
            response.headers.set("X-Request-ID", id.to_string());
        }
    }
}

/// Logs request/response lines at the plugin layer.
pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn pre_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        info!("Request: {} {}", request.method, request.path);
        None
    }

    fn post_request(
        &self,
        _request: &GatewayRequest,
        response: &GatewayResponse,
    ) -> Option<GatewayResponse> {
        info!("Response: {}", response.status);
        None
    }
}
