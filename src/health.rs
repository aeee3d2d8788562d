use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let detector = state.detector.config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
            "stream_port": config.stream.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_streams": metrics.stream.active_connections
        },
        "memory": get_memory_info(),
        "detector": {
            "sample_rate": detector.sample_rate(),
            "min_lag": detector.min_lag(),
            "max_lag": detector.max_lag(),
            "effective_range_hz": [
                detector.lowest_detectable_hz(),
                detector.highest_detectable_hz()
            ]
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats
        },
        "stream": stream_stats(&metrics),
        "memory": get_memory_info()
    }))
}

fn stream_stats(metrics: &AppMetrics) -> serde_json::Value {
    let stream = &metrics.stream;
    json!({
        "active_connections": stream.active_connections,
        "total_connections": stream.total_connections,
        "frames_processed": stream.frames_processed,
        "voiced_frames": stream.voiced_frames,
        "silent_frames": stream.frames_processed.saturating_sub(stream.voiced_frames),
        "voiced_ratio": if stream.frames_processed > 0 {
            stream.voiced_frames as f64 / stream.frames_processed as f64
        } else {
            0.0
        }
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field_bytes = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pitch::PitchDetector;
    use actix_web::{test, App};

    fn state() -> AppState {
        let config = AppConfig::default();
        let detector = PitchDetector::new(config.detector.to_detector_config().unwrap());
        AppState::new(config, detector)
    }

    #[actix_web::test]
    async fn test_health_reports_detector() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["stream_port"], 8081);
        assert_eq!(body["detector"]["min_lag"], 110);
        assert_eq!(body["detector"]["max_lag"], 551);
    }

    #[actix_web::test]
    async fn test_metrics_include_stream_counters() {
        let state = state();
        state.stream_opened();
        state.stream_closed(4, 3);
        state.record_request("GET /health", 2, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["stream"]["total_connections"], 1);
        assert_eq!(body["stream"]["active_connections"], 0);
        assert_eq!(body["stream"]["silent_frames"], 1);
        assert_eq!(body["stream"]["voiced_ratio"], 0.75);
        assert_eq!(body["http"]["endpoints"][0]["endpoint"], "GET /health");
    }
}
