//! Health, readiness and liveness endpoints.
//!
//! `/health` re-runs the registered gateway checks and answers 200 while
//! the aggregate is Healthy or Degraded, 503 when a critical check is
//! failing. `/ready` and `/live` reflect the Kubernetes-style probes.

use crate::services::probes::{HealthRegistry, LivenessProbe, ReadinessProbe};
use crate::models::backend::HealthStatus;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

/// Shared state behind the health endpoints.
pub struct HealthState {
    pub registry: Arc<HealthRegistry>,
    pub readiness: Arc<ReadinessProbe>,
    pub liveness: Arc<LivenessProbe>,
}

pub async fn health_check(state: web::Data<HealthState>) -> Result<HttpResponse> {
    state.registry.check_all();
    let summary = state.registry.summary();

    let response = match state.registry.overall_status() {
        HealthStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(summary),
        _ => HttpResponse::Ok().json(summary),
    };
    Ok(response)
}

pub async fn readiness_check(state: web::Data<HealthState>) -> Result<HttpResponse> {
    state.readiness.check();
    let status = state.readiness.status();
    if state.readiness.is_ready() {
        Ok(HttpResponse::Ok().json(status))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(status))
    }
}

pub async fn liveness_check(state: web::Data<HealthState>) -> Result<HttpResponse> {
    state.liveness.check();
    let status = state.liveness.status();
    if state.liveness.is_alive() {
        Ok(HttpResponse::Ok().json(status))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(status))
    }
}

/// Basic service info, useful as a smoke endpoint.
pub async fn info() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "service": "tollgate-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Configures the health routes.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check))
        .route("/info", web::get().to(info));
}
