//! The gateway middleware chain.
//!
//! Middleware wrap the request pipeline: `pre_request` hooks run in
//! insertion order and may mutate the request or short-circuit with a
//! response (the remaining pre hooks are skipped); `post_request` hooks run
//! in *reverse* order over the response, including for short-circuited
//! responses. Hook panics are caught and logged; they never abort the
//! pipeline.
//!
//! # Module Organization
//!
//! - [`auth`] - authentication + ACL enforcement
//! - [`cors`] - preflight handling and CORS response headers
//! - [`logging`] - request/response and access logging
//! - [`rate_limit`] - keyed rate limiting with quota headers
//! - [`transform`] - header rewrite rules

pub mod auth;
pub mod cors;
pub mod logging;
pub mod rate_limit;
pub mod transform;

use crate::models::http::{GatewayRequest, GatewayResponse};
use log::error;
use std::sync::Arc;

/// A middleware in the gateway's own chain.
///
/// Both hooks are synchronous over the model types; anything that needs
/// async I/O belongs in the forwarder or a plugin-driven service instead.
pub trait Middleware: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Runs before routing. Returning `Some(response)` short-circuits the
    /// pipeline: no further pre hooks run, the response skips the backend
    /// and goes straight to post-processing.
    fn pre_request(&self, _request: &mut GatewayRequest) -> Option<GatewayResponse> {
        None
    }

    /// Runs after a response exists, in reverse chain order.
    fn post_request(&self, _request: &GatewayRequest, _response: &mut GatewayResponse) {}
}

/// Ordered middleware chain.
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs the pre chain. Returns the short-circuit response, if any.
    pub fn process_request(&self, request: &mut GatewayRequest) -> Option<GatewayResponse> {
        for mw in &self.middleware {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                mw.pre_request(request)
            }));
            match outcome {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(_) => error!("Middleware '{}' panicked in pre_request", mw.name()),
            }
        }
        None
    }

    /// Runs the post chain in reverse order.
    pub fn process_response(&self, request: &GatewayRequest, response: &mut GatewayResponse) {
        for mw in self.middleware.iter().rev() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                mw.post_request(request, response)
            }));
            if outcome.is_err() {
                error!("Middleware '{}' panicked in post_request", mw.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        order: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.label
        }

        fn pre_request(&self, _request: &mut GatewayRequest) -> Option<GatewayResponse> {
            self.order.lock().unwrap().push(format!("pre:{}", self.label));
            if self.short_circuit {
                Some(GatewayResponse::text("stopped", 403))
            } else {
                None
            }
        }

        fn post_request(&self, _request: &GatewayRequest, _response: &mut GatewayResponse) {
            self.order.lock().unwrap().push(format!("post:{}", self.label));
        }
    }

    #[test]
    fn pre_in_order_post_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(Arc::new(Recorder {
            label: "a",
            order: order.clone(),
            short_circuit: false,
        }));
        chain.add(Arc::new(Recorder {
            label: "b",
            order: order.clone(),
            short_circuit: false,
        }));

        let mut request = GatewayRequest::new("GET", "/");
        assert!(chain.process_request(&mut request).is_none());
        let mut response = GatewayResponse::new(200);
        chain.process_response(&request, &mut response);

        assert_eq!(
            *order.lock().unwrap(),
            vec!["pre:a", "pre:b", "post:b", "post:a"]
        );
    }

    #[test]
    fn short_circuit_stops_pre_chain() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(Arc::new(Recorder {
            label: "first",
            order: order.clone(),
            short_circuit: true,
        }));
        chain.add(Arc::new(Recorder {
            label: "second",
            order: order.clone(),
            short_circuit: false,
        }));

        let mut request = GatewayRequest::new("GET", "/");
        let response = chain.process_request(&mut request).unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(*order.lock().unwrap(), vec!["pre:first"]);
    }

    struct Panicker;
    impl Middleware for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }
        fn pre_request(&self, _request: &mut GatewayRequest) -> Option<GatewayResponse> {
            panic!("boom");
        }
    }

    struct CountingPost(Arc<AtomicUsize>);
    impl Middleware for CountingPost {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn post_request(&self, _request: &GatewayRequest, _response: &mut GatewayResponse) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn panicking_hook_does_not_abort_chain() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::new();
        chain.add(Arc::new(Panicker));
        chain.add(Arc::new(CountingPost(count.clone())));

        let mut request = GatewayRequest::new("GET", "/");
        assert!(chain.process_request(&mut request).is_none());
        let mut response = GatewayResponse::new(200);
        chain.process_response(&request, &mut response);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
