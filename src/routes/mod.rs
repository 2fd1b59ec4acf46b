//! HTTP route handlers for the admin surface and the proxy entry point.
//!
//! - [`health`] - `/health`, `/ready` and `/live` endpoints
//! - [`metrics`] - the metrics exposition endpoint
//! - [`http`] - the catch-all handler that feeds requests into the
//!   gateway pipeline

pub mod health;
pub mod http;
pub mod metrics;
