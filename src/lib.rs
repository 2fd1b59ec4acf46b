//! # Tollgate-rs API Gateway
//!
//! A high-performance, async L7 HTTP API gateway built with Rust and Actix Web.
//! Tollgate-rs terminates client connections, authenticates and rate-limits
//! them, matches each request to a route, selects a healthy backend through a
//! pluggable load-balancing policy, and forwards the request with retry and
//! circuit-breaker protection.
//!
//! ## Core Features
//!
//! - **Routing**: priority-ordered route table with path parameters
//!   (`/users/:id`), optional segments (`:id?`) and wildcards (`*`, `**`)
//! - **Load balancing**: round-robin, smooth weighted round-robin, least
//!   connections, random, IP hash, least response time and resource-based
//!   policies over a managed backend pool
//! - **Traffic protection**: five rate-limiting algorithms with per-key
//!   buckets, circuit breakers and retry with configurable backoff
//! - **Health**: TCP/HTTP(S) backend probes with hysteresis plus
//!   Kubernetes-style readiness, liveness and startup probes
//! - **Security**: Basic, API-key, bearer, JWT and OAuth2 authentication
//!   providers with a role/policy ACL engine
//! - **Extensibility**: an ordered middleware chain and a priority-based
//!   plugin hook system
//!
//! ## Request Flow
//!
//! ```text
//! client → accept → middleware pre-chain → router → ACL → rate limit
//!        → load balancer → circuit breaker → retry(proxy forward)
//!        → middleware post-chain → client
//! ```
//!
//! The health checker and the rate-limiter eviction task run as independent
//! background activities mutating the pool and limiter state observed by the
//! request path.
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration loading (JSON/YAML files, `GATEWAY_` env vars)
//! - [`models`] - Request/response, backend, route and error types
//! - [`routing`] - Pattern matcher and priority router
//! - [`services`] - Load balancing, pooling, health, rate limiting, circuit
//!   breaking, retry, proxying, metrics and the gateway orchestrator
//! - [`middleware`] - CORS, logging, rate-limit, auth and transform middleware
//! - [`security`] - Authentication providers and the ACL engine
//! - [`plugins`] - Lifecycle hook plugins
//! - [`routes`] - Actix handlers for the admin surface and the proxy entry
//! - [`logs`] - Logger configuration
//! - [`utils`] - Path and address helpers

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod plugins;
pub mod routes;
pub mod routing;
pub mod security;
pub mod services;
pub mod utils;
