use crate::{error::AppError, error::AppResult, state::AppState};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

/// Effective configuration. Lag bounds come from the detector that is
/// serving streams; detector settings are fixed at startup.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = state.config();
    let detector = state.detector.config();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "allowed_origins": config.server.allowed_origins
            },
            "stream": {
                "port": config.stream.port,
                "path": config.stream.path,
                "max_message_bytes": config.stream.max_message_bytes
            },
            "detector": {
                "sample_rate": detector.sample_rate(),
                "min_freq": config.detector.min_freq,
                "max_freq": config.detector.max_freq,
                "min_lag": detector.min_lag(),
                "max_lag": detector.max_lag(),
                "effective_range_hz": [
                    detector.lowest_detectable_hz(),
                    detector.highest_detectable_hz()
                ]
            }
        }
    }))
}

/// Fallback for unknown routes.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!(
        "No route for {} {}",
        req.method(),
        req.path()
    )))
}
