//! # Voice Pitch HTTP Handlers
//!
//! HTTP side of the voice pitch API. The live estimation itself runs on the
//! stream listener (see `websocket`); these endpoints only describe it.
//!
//! ## Available Endpoints:
//! - `GET /api/voicepitch/getpitches` - fixed catalogue of vocal ranges
//! - `GET /api/voicepitch/ws` - points plain HTTP clients at the stream port

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

/// One entry of the vocal-range catalogue.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VocalRange {
    pub label: &'static str,
    pub range: &'static str,
}

/// Vocal ranges, lowest voice first.
pub const VOCAL_RANGES: [VocalRange; 4] = [
    VocalRange {
        label: "Bass",
        range: "75 - 330 Hz",
    },
    VocalRange {
        label: "Tenor",
        range: "120 - 500 Hz",
    },
    VocalRange {
        label: "Mezzo-soprano",
        range: "170 - 700 Hz",
    },
    VocalRange {
        label: "Soprano",
        range: "230 - 1100 Hz",
    },
];

pub async fn get_pitches() -> HttpResponse {
    HttpResponse::Ok().json(VOCAL_RANGES)
}

/// The stream is not served by the HTTP server; answer like a non-upgrade
/// request and name the listener that does serve it.
pub async fn stream_endpoint_hint(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let config = state.config();
    let host = req.connection_info().host().to_string();

    Err(AppError::BadRequest(format!(
        "WebSocket upgrade required; connect to ws://{}:{}{}",
        strip_port(&host),
        config.stream.port,
        config.stream.path
    )))
}

/// `Host` header without its port. Bracketed IPv6 literals keep their colons.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !host.ends_with(']')
                && !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pitch::PitchDetector;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_catalogue_order() {
        let app = test::init_service(
            App::new().route("/api/voicepitch/getpitches", web::get().to(get_pitches)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/voicepitch/getpitches").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let labels: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, ["Bass", "Tenor", "Mezzo-soprano", "Soprano"]);
        assert_eq!(body[0]["range"], "75 - 330 Hz");
        assert_eq!(body[3]["range"], "230 - 1100 Hz");
    }

    #[actix_web::test]
    async fn test_stream_hint_is_bad_request() {
        let config = AppConfig::default();
        let detector = PitchDetector::new(config.detector.to_detector_config().unwrap());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config, detector)))
                .route("/api/voicepitch/ws", web::get().to(stream_endpoint_hint)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/voicepitch/ws")
            .insert_header(("Host", "localhost:8080"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("ws://localhost:8081/api/voicepitch/ws"));
    }

    #[::core::prelude::v1::test]
    fn test_strip_port() {
        assert_eq!(strip_port("localhost:8080"), "localhost");
        assert_eq!(strip_port("pitch.test"), "pitch.test");
        assert_eq!(strip_port("10.0.0.7:80"), "10.0.0.7");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[fe80::1]"), "[fe80::1]");
    }

    #[actix_web::test]
    async fn test_stream_hint_keeps_ipv6_host() {
        let config = AppConfig::default();
        let detector = PitchDetector::new(config.detector.to_detector_config().unwrap());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config, detector)))
                .route("/api/voicepitch/ws", web::get().to(stream_endpoint_hint)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/voicepitch/ws")
            .insert_header(("Host", "[::1]"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("ws://[::1]:8081/api/voicepitch/ws"));
    }
}
