//! Data models and domain types for the tollgate-rs gateway.
//!
//! This module contains the core types that flow through the request
//! pipeline: the gateway's own request/response representation, backend
//! records with their runtime counters, route definitions and the central
//! error type that maps pipeline failures onto HTTP responses.

pub mod backend;
pub mod error;
pub mod http;
pub mod route;
pub mod settings;
