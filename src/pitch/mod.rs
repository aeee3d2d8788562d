//! # Pitch Estimation
//!
//! Pure numeric core of the service: decoding PCM messages into frames and
//! estimating one fundamental frequency per frame.
//!
//! ## Components:
//! - **frame**: `SampleFrame` and little-endian `f32` decoding
//! - **detector**: autocorrelation detector, its configuration and result type

pub mod detector;
pub mod frame;

pub use detector::{DetectorConfig, DetectorConfigError, PitchDetector, PitchEstimate};
pub use frame::SampleFrame;
