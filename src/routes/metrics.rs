//! Metrics exposition endpoint.
//!
//! Serves Prometheus text format by default; `?format=openmetrics` selects
//! the OpenMetrics variant and `?format=json` the JSON export.

use crate::services::metrics::MetricsCollector;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use std::sync::Arc;

pub async fn metrics_handler(
    req: HttpRequest,
    collector: web::Data<Arc<MetricsCollector>>,
) -> Result<HttpResponse> {
    let format = req
        .query_string()
        .split('&')
        .find_map(|pair| pair.strip_prefix("format="))
        .unwrap_or("prometheus");

    let response = match format {
        "json" => HttpResponse::Ok().json(collector.export_json()),
        "openmetrics" => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(collector.export_openmetrics()),
        _ => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(collector.export_prometheus()),
    };
    Ok(response)
}

/// Configures the metrics route at the given path.
pub fn configure_metrics(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.route(path, web::get().to(metrics_handler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn collector() -> Arc<MetricsCollector> {
        let collector = Arc::new(MetricsCollector::new("gateway"));
        collector.counter("requests_total", "Total requests").inc();
        collector
    }

    #[actix_web::test]
    async fn prometheus_by_default() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(collector()))
                .configure(|cfg| configure_metrics(cfg, "/metrics")),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), 200);
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# TYPE gateway_requests_total counter"));
        assert!(text.contains("gateway_requests_total 1"));
    }

    #[actix_web::test]
    async fn openmetrics_variant() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(collector()))
                .configure(|cfg| configure_metrics(cfg, "/metrics")),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/metrics?format=openmetrics")
                .to_request(),
        )
        .await;
        let text = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(text.contains("gateway_requests_total_total 1"));
        assert!(text.ends_with("# EOF"));
    }

    #[actix_web::test]
    async fn json_variant() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(collector()))
                .configure(|cfg| configure_metrics(cfg, "/metrics")),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/metrics?format=json").to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["timestamp"].is_i64());
        assert!(body["metrics"]["counters"].is_object());
    }
}
