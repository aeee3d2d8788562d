//! # Application State Management
//!
//! State shared by every HTTP handler and every stream connection.
//!
//! ## Sharing Model:
//! - **config**: `Arc<AppConfig>`, read-only after startup
//! - **detector**: `Arc<PitchDetector>`, immutable; each `detect` call works on
//!   its own frame, so connections share it without locking
//! - **metrics**: `Arc<RwLock<AppMetrics>>`, the only mutable part
//!
//! Metric locks are never held across an `.await`, and a poisoned lock is
//! recovered rather than propagated: counters are advisory.

use crate::config::AppConfig;
use crate::pitch::PitchDetector;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub detector: Arc<PitchDetector>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across HTTP requests and stream connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total HTTP requests processed since server start
    pub request_count: u64,

    /// HTTP responses with a 4xx/5xx status
    pub error_count: u64,

    /// Per-route HTTP statistics, keyed like "GET /health"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub stream: StreamMetrics,
}

/// Pitch stream counters.
#[derive(Debug, Default, Clone)]
pub struct StreamMetrics {
    /// Connections currently inside their receive/detect/reply loop
    pub active_connections: u32,

    /// Connections accepted since server start
    pub total_connections: u64,

    /// Frames answered by closed connections
    pub frames_processed: u64,

    /// Of those, frames answered with a non-zero frequency
    pub voiced_frames: u64,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, detector: PitchDetector) -> Self {
        Self {
            config: Arc::new(config),
            detector: Arc::new(detector),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one finished HTTP request.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A stream connection completed its upgrade and entered the loop.
    pub fn stream_opened(&self) {
        let mut metrics = self.metrics_write();
        metrics.stream.active_connections += 1;
        metrics.stream.total_connections += 1;
    }

    /// A stream connection left the loop after answering `frames` frames.
    pub fn stream_closed(&self, frames: u64, voiced_frames: u64) {
        let mut metrics = self.metrics_write();
        metrics.stream.active_connections = metrics.stream.active_connections.saturating_sub(1);
        metrics.stream.frames_processed += frames;
        metrics.stream.voiced_frames += voiced_frames;
    }

    /// Copy of the current counters, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
