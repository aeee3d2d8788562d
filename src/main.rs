//! # Voice Pitch Backend
//!
//! Real-time fundamental frequency (pitch) estimation for a live mono audio
//! stream. Two listeners share one process:
//!
//! - **HTTP API** (`server.port`): vocal-range catalogue, health, metrics, config
//! - **Pitch stream** (`stream.port`): WebSocket; one frequency reply per PCM frame
//!
//! ## Modules:
//! - **pitch**: autocorrelation detector and PCM frame decoding
//! - **websocket**: per-connection receive/detect/reply loop and its listener
//! - **config**: layered startup configuration (defaults, config.toml, env)
//! - **state**: shared detector, config and metrics
//! - **health**, **handlers**, **middleware**: HTTP surface
//! - **error**: HTTP error type

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pitch;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use pitch::PitchDetector;
use state::AppState;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    let detector = PitchDetector::new(config.detector.to_detector_config()?);
    let detector_config = *detector.config();

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        sample_rate = detector_config.sample_rate(),
        min_lag = detector_config.min_lag(),
        max_lag = detector_config.max_lag(),
        "Pitch detector ready ({:.1} - {:.1} Hz)",
        detector_config.lowest_detectable_hz(),
        detector_config.highest_detectable_hz()
    );

    let app_state = AppState::new(config.clone(), detector);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stream_addr = config.stream_bind_addr();
    let stream_listener = TcpListener::bind(&stream_addr)
        .await
        .with_context(|| format!("Failed to bind pitch stream listener on {}", stream_addr))?;
    info!("Pitch stream listening on ws://{}{}", stream_addr, config.stream.path);
    let stream_task = tokio::spawn(websocket::serve(
        stream_listener,
        app_state.clone(),
        shutdown_rx,
    ));

    let http_addr = config.http_bind_addr();
    info!("Starting HTTP server on {}", http_addr);

    let allowed_origins = config.server.allowed_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors_policy(&allowed_origins))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(
                web::scope("/api/voicepitch")
                    .route("/getpitches", web::get().to(handlers::get_pitches))
                    .route("/ws", web::get().to(handlers::stream_endpoint_hint)),
            )
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::to(handlers::not_found))
    })
    .disable_signals()
    .bind(&http_addr)
    .with_context(|| format!("Failed to bind HTTP server on {}", http_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Unblocks every pitch stream waiting for a frame
    if shutdown_tx.send(true).is_err() {
        info!("Pitch stream listener already stopped");
    }
    if let Err(e) = stream_task.await {
        error!("Pitch stream listener task error: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging from `RUST_LOG`, defaulting to debug for this crate.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_pitch_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// CORS for the HTTP API; an empty origin list allows any origin.
fn cors_policy(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method().allow_any_header().max_age(3600)
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C elsewhere).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers, falling back to Ctrl-C: {}", e);
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
